//! Client for a text-embeddings-inference style `/embed` server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use super::{Embedder, check_dimension};
use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
    normalize: bool,
}

/// Embeds text by calling a remote embedding server.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model_id: String,
    dimension: usize,
    batch_size: usize,
    warm: AtomicBool,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            dimension: config.dimension,
            batch_size: (config.batch_size as usize).max(1),
            warm: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`; any 2xx counts as healthy.
    pub async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::ServerError(format!(
                "health check failed with status: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn ensure_warm(&self) -> Result<(), EmbeddingError> {
        if self.is_warm() {
            Ok(())
        } else {
            Err(EmbeddingError::NotWarmedUp(self.model_id.clone()))
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embed", self.base_url);
        let request = EmbedRequest {
            inputs: texts,
            truncate: true,
            normalize: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else if e.is_connect() {
                    EmbeddingError::ConnectionError(e.to_string())
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            check_dimension(self.dimension, vector)?;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        if self.is_warm() {
            return Ok(());
        }
        self.health_check().await?;
        self.warm.store(true, Ordering::Release);
        info!(url = %self.base_url, model = %self.model_id, "embedding server ready");
        Ok(())
    }

    fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.ensure_warm()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch(chunk).await?);
        }
        debug!(count = all.len(), "embedded documents over http");
        Ok(all)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.ensure_warm()?;
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            url: "http://localhost:11411/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_trimming() {
        let embedder = HttpEmbedder::new(&config()).unwrap();
        assert_eq!(embedder.base_url(), "http://localhost:11411");
    }

    #[tokio::test]
    async fn test_requires_warm_up() {
        let embedder = HttpEmbedder::new(&config()).unwrap();
        assert!(!embedder.is_warm());
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::NotWarmedUp(_)));
    }

    #[tokio::test]
    async fn test_warm_up_fails_without_server() {
        let embedder = HttpEmbedder::new(&EmbeddingConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();
        assert!(embedder.warm_up().await.is_err());
        assert!(!embedder.is_warm());
    }
}
