//! In-process sentence-transformer inference with ONNX Runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy};
use tracing::info;

use super::{Embedder, check_dimension};
use crate::error::{EmbeddingError, ModelError};
use crate::models::EmbeddingConfig;

/// A loaded ONNX session plus its tokenizer.
pub struct EmbeddingModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

impl EmbeddingModel {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path, max_tokens: usize, dimension: usize) -> Result<Self, ModelError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension,
        })
    }

    /// Mean-pooled, L2-normalised embeddings for `texts`.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            for (j, (&id, &m)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .enumerate()
            {
                input_ids[i * seq_len + j] = i64::from(id);
                attention_mask[i * seq_len + j] = i64::from(m);
            }
        }

        let ids_tensor = Tensor::from_array(([batch_size, seq_len], input_ids))
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;
        let mask_tensor = Tensor::from_array(([batch_size, seq_len], attention_mask.clone()))
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceError("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![ids_tensor, mask_tensor])
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        pool(&hidden, &attention_mask, batch_size, seq_len, self.dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Average token vectors under the attention mask, then L2-normalise.
///
/// Models exported with pooling already applied return `[batch, hidden]`;
/// those rows are only normalised.
fn pool(
    hidden: &ArrayViewD<'_, f32>,
    mask: &[i64],
    batch_size: usize,
    seq_len: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, ModelError> {
    let shape = hidden.shape();
    let width = *shape.last().unwrap_or(&0);
    if width < dimension {
        return Err(ModelError::InferenceError(format!(
            "model produces {} values per token, configured dimension is {}",
            width, dimension
        )));
    }

    match shape.len() {
        3 => Ok((0..batch_size)
            .map(|i| {
                let mut sum = vec![0.0f32; dimension];
                let mut count = 0.0f32;
                for j in 0..seq_len {
                    if mask[i * seq_len + j] == 0 {
                        continue;
                    }
                    count += 1.0;
                    for (d, acc) in sum.iter_mut().enumerate() {
                        *acc += hidden[[i, j, d]];
                    }
                }
                if count > 0.0 {
                    sum.iter_mut().for_each(|x| *x /= count);
                }
                normalize(&sum)
            })
            .collect()),
        2 => Ok((0..batch_size)
            .map(|i| {
                let row: Vec<f32> = (0..dimension).map(|d| hidden[[i, d]]).collect();
                normalize(&row)
            })
            .collect()),
        _ => Err(ModelError::InferenceError(format!(
            "unexpected output shape: {:?}",
            shape
        ))),
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// [`Embedder`] backed by a local ONNX model, loaded on `warm_up`.
pub struct OnnxEmbedder {
    model_id: String,
    model_dir: Option<PathBuf>,
    max_tokens: usize,
    dimension: usize,
    model: OnceLock<Arc<EmbeddingModel>>,
    loading: tokio::sync::Mutex<()>,
}

impl OnnxEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            model_dir: config.resolve_model_dir(),
            max_tokens: config.max_tokens as usize,
            dimension: config.dimension,
            model: OnceLock::new(),
            loading: tokio::sync::Mutex::new(()),
        }
    }

    fn model(&self) -> Result<Arc<EmbeddingModel>, EmbeddingError> {
        self.model
            .get()
            .cloned()
            .ok_or_else(|| EmbeddingError::NotWarmedUp(self.model_id.clone()))
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model()?;
        let vectors = tokio::task::spawn_blocking(move || model.embed(&texts))
            .await
            .map_err(|e| ModelError::InferenceError(e.to_string()))??;
        for vector in &vectors {
            check_dimension(self.dimension, vector)?;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        if self.model.get().is_some() {
            return Ok(());
        }
        let _guard = self.loading.lock().await;
        if self.model.get().is_some() {
            return Ok(());
        }

        let model_dir = self
            .model_dir
            .clone()
            .ok_or_else(|| ModelError::NotFound("no model directory configured".to_string()))?;
        let (max_tokens, dimension) = (self.max_tokens, self.dimension);

        info!(model = %self.model_id, dir = %model_dir.display(), "loading embedding model");
        let model = tokio::task::spawn_blocking(move || {
            EmbeddingModel::load(&model_dir, max_tokens, dimension)
        })
        .await
        .map_err(|e| ModelError::LoadError(e.to_string()))??;

        let _ = self.model.set(Arc::new(model));
        Ok(())
    }

    fn is_warm(&self) -> bool {
        self.model.get().is_some()
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.run(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding output".to_string()))
    }
}
