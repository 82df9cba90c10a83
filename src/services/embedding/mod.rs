//! Text embedding backends and the document embedding stage.
//!
//! Both backends need an explicit [`Embedder::warm_up`] before use: the ONNX
//! backend loads its model, the HTTP backend checks the server is healthy.

mod http;
mod onnx;

pub use http::HttpEmbedder;
pub use onnx::{EmbeddingModel, OnnxEmbedder};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EmbeddingError, IngestionError, StageFailure};
use crate::models::{Document, EmbeddingBackend, EmbeddingConfig};
use crate::pipelines::IngestStage;
use crate::utils::retry::{RetryConfig, with_retry, with_timeout};

/// Turns text into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Prepare the backend. Calling it again is a no-op.
    async fn warm_up(&self) -> Result<(), EmbeddingError>;

    fn is_warm(&self) -> bool;

    /// Embed a batch of passages for indexing.
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single question for search.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub type SharedEmbedder = Arc<dyn Embedder>;

/// Build the embedder selected by `config.backend`. Nothing is loaded yet.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<SharedEmbedder, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Onnx => Ok(Arc::new(OnnxEmbedder::new(config))),
        EmbeddingBackend::Http => Ok(Arc::new(HttpEmbedder::new(config)?)),
    }
}

/// Check a vector against the dimension the embedder promised.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Ingestion stage attaching an embedding to every document.
pub struct DocumentEmbedder {
    embedder: SharedEmbedder,
    batch_size: usize,
    timeout: Duration,
    retry: RetryConfig,
}

impl DocumentEmbedder {
    pub fn new(embedder: SharedEmbedder, batch_size: usize, timeout: Duration) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            timeout,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    /// Embed `documents` batch by batch, in order.
    ///
    /// On failure the error reports how many documents were embedded before
    /// the failing batch.
    pub async fn run(&self, mut documents: Vec<Document>) -> Result<Vec<Document>, IngestionError> {
        let fail = |processed: usize, source: StageFailure| IngestionError::Stage {
            stage: IngestStage::Embed,
            processed,
            source,
        };

        self.embedder
            .warm_up()
            .await
            .map_err(|e| fail(0, e.into()))?;

        let expected = self.embedder.dimension();
        let total = documents.len();
        let mut processed = 0;

        for batch in documents.chunks_mut(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();

            let vectors = with_retry(&self.retry, "embed documents", || {
                with_timeout(
                    "embed documents",
                    self.timeout,
                    self.embedder.embed_documents(texts.clone()),
                )
            })
            .await
            .map_err(|e| fail(processed, e))?;

            if vectors.len() != batch.len() {
                return Err(fail(
                    processed,
                    EmbeddingError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    ))
                    .into(),
                ));
            }

            for (document, vector) in batch.iter_mut().zip(vectors) {
                check_dimension(expected, &vector).map_err(|e| fail(processed, e.into()))?;
                document.embedding = vector;
            }

            processed += batch.len();
            debug!(processed, total, "embedded batch");
        }

        Ok(documents)
    }
}
