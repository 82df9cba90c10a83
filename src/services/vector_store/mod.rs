//! Vector store abstraction layer.
//!
//! A store is bound to one [`VectorCollection`] at construction; every
//! operation is scoped to that collection's namespace. Backends are selected
//! by [`resolve_vector_store`] from configuration.

mod memory;
mod pinecone;
mod qdrant;

pub use memory::MemoryStore;
pub use pinecone::PineconeStore;
pub use qdrant::QdrantStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ConfigError, IngestionError, StageFailure, VectorStoreError};
use crate::models::{
    Config, Document, ScoredDocument, VectorCollection, VectorDriver, VectorStoreConfig,
    optional_credential, require_credential,
};
use crate::pipelines::IngestStage;
use crate::utils::retry::{RetryConfig, with_retry, with_timeout};

/// Payload field holding a document's text.
pub(crate) const CONTENT_FIELD: &str = "content";
/// Payload field holding the namespace, for backends without native namespaces.
pub(crate) const NAMESPACE_FIELD: &str = "namespace";

/// Operations every vector store backend provides.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and status output.
    fn backend(&self) -> &'static str;

    fn collection(&self) -> &VectorCollection;

    /// Check if the vector store is reachable.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Create the index or collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<(), VectorStoreError>;

    /// Extra time `ensure_collection` may spend waiting for a new index to
    /// become usable, on top of the per-request timeout.
    fn provisioning_timeout(&self) -> Duration {
        Duration::ZERO
    }

    /// Insert or overwrite documents by id. Every document must carry an
    /// embedding of the collection's dimension. Returns the number written.
    async fn upsert(&self, documents: &[Document]) -> Result<usize, VectorStoreError>;

    /// Up to `top_k` nearest documents in the namespace, best first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorStoreError>;

    /// Number of vectors stored in the namespace.
    async fn count(&self) -> Result<u64, VectorStoreError>;

    /// Remove every vector in the namespace.
    async fn delete_all(&self) -> Result<(), VectorStoreError>;
}

pub type SharedVectorStore = Arc<dyn VectorStore>;

/// A configured store together with the collection it is bound to.
#[derive(Clone)]
pub struct VectorStoreHandle {
    collection: VectorCollection,
    store: SharedVectorStore,
}

impl std::fmt::Debug for VectorStoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreHandle")
            .field("backend", &self.store.backend())
            .field("collection", &self.collection)
            .finish()
    }
}

impl VectorStoreHandle {
    pub fn new(store: SharedVectorStore) -> Self {
        Self {
            collection: store.collection().clone(),
            store,
        }
    }

    pub fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    pub fn store(&self) -> &SharedVectorStore {
        &self.store
    }
}

pub fn collection_from_config(config: &VectorStoreConfig) -> VectorCollection {
    VectorCollection::new(
        config.index_name.clone(),
        config.namespace.clone(),
        config.dimension,
        config.metric,
    )
}

/// Build the store named by `config.driver`.
///
/// No network traffic happens here. The Pinecone driver fails with
/// [`ConfigError::MissingCredential`] when its API key variable is unset or
/// blank; Qdrant uses the key only if present.
pub fn resolve_vector_store(config: &VectorStoreConfig) -> Result<VectorStoreHandle, ConfigError> {
    let collection = collection_from_config(config);
    let timeout = Duration::from_secs(config.timeout_secs);
    let client_error = |e: VectorStoreError| ConfigError::ValidationError(e.to_string());

    let store: SharedVectorStore = match config.driver {
        VectorDriver::Pinecone => {
            let api_key = require_credential(&config.api_key_env)?;
            let mut store = PineconeStore::new(
                api_key,
                collection,
                &config.cloud,
                &config.region,
                timeout,
            )
            .map_err(client_error)?
            .with_ready_timeout(Duration::from_secs(config.ready_timeout_secs));
            if let Some(ref url) = config.control_url {
                store = store.with_control_url(url);
            }
            Arc::new(store)
        }
        VectorDriver::Qdrant => {
            let api_key = optional_credential(&config.api_key_env);
            Arc::new(
                QdrantStore::new(&config.url, api_key, collection, timeout)
                    .map_err(client_error)?,
            )
        }
        VectorDriver::Memory => Arc::new(MemoryStore::new(collection)),
    };

    debug!(
        backend = store.backend(),
        index = %store.collection().index_name,
        namespace = %store.collection().namespace,
        "resolved vector store"
    );
    Ok(VectorStoreHandle::new(store))
}

/// Ingestion stage writing embedded documents to the store.
///
/// Writes are upserts keyed by document id, so ingesting the same content
/// twice leaves one copy per chunk.
pub struct DocumentWriter {
    store: SharedVectorStore,
    batch_size: usize,
    timeout: Duration,
    retry: RetryConfig,
}

impl DocumentWriter {
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub fn new(store: SharedVectorStore, timeout: Duration) -> Self {
        Self {
            store,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            timeout,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(config: &Config, store: SharedVectorStore) -> Self {
        Self::new(store, Duration::from_secs(config.vector_store.timeout_secs))
            .with_retry(RetryConfig::from(&config.retry))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Write all documents; returns how many the store accepted.
    pub async fn run(&self, documents: &[Document]) -> Result<usize, IngestionError> {
        let fail = |processed: usize, source: StageFailure| IngestionError::Stage {
            stage: IngestStage::Write,
            processed,
            source,
        };

        let setup_timeout = self.timeout + self.store.provisioning_timeout();
        with_retry(&self.retry, "ensure collection", || {
            with_timeout(
                "ensure collection",
                setup_timeout,
                self.store.ensure_collection(),
            )
        })
        .await
        .map_err(|e| fail(0, e))?;

        let mut written = 0;
        for batch in documents.chunks(self.batch_size) {
            let count = with_retry(&self.retry, "upsert", || {
                with_timeout("upsert", self.timeout, self.store.upsert(batch))
            })
            .await
            .map_err(|e| fail(written, e))?;
            written += count;
        }

        info!(
            backend = self.store.backend(),
            namespace = %self.store.collection().namespace,
            written,
            "wrote documents"
        );
        Ok(written)
    }

    /// Remove every vector in the namespace. Returns how many were stored.
    pub async fn clear(&self) -> Result<u64, IngestionError> {
        let fail = |source: StageFailure| IngestionError::Stage {
            stage: IngestStage::Write,
            processed: 0,
            source,
        };

        let existing = with_retry(&self.retry, "count", || {
            with_timeout("count", self.timeout, self.store.count())
        })
        .await
        .map_err(fail)?;

        with_retry(&self.retry, "delete namespace", || {
            with_timeout("delete namespace", self.timeout, self.store.delete_all())
        })
        .await
        .map_err(fail)?;

        info!(
            backend = self.store.backend(),
            namespace = %self.store.collection().namespace,
            removed = existing,
            "cleared namespace"
        );
        Ok(existing)
    }
}

/// Sort best first and keep at most `top_k`.
pub(crate) fn rank(mut documents: Vec<ScoredDocument>, top_k: usize) -> Vec<ScoredDocument> {
    documents.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    documents.truncate(top_k);
    documents
}

/// Reject a vector whose width differs from the collection's.
pub(crate) fn check_width(
    collection: &VectorCollection,
    embedding: &[f32],
    what: &str,
) -> Result<(), VectorStoreError> {
    if embedding.len() != collection.dimension {
        return Err(VectorStoreError::ClientError(format!(
            "{} has dimension {}, collection {} expects {}",
            what,
            embedding.len(),
            collection.index_name,
            collection.dimension
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::FlakyStore;
    use super::*;
    use crate::models::Metric;

    fn collection() -> VectorCollection {
        VectorCollection::new("test", "default", 3, Metric::Cosine)
    }

    fn embedded(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                let mut doc = Document::from_file(format!("doc {}", i), "/a.txt", "a.txt");
                doc.embedding = vec![1.0, i as f32, 0.0];
                doc
            })
            .collect()
    }

    #[test]
    fn test_pinecone_requires_credential_before_any_client() {
        let config = VectorStoreConfig {
            driver: VectorDriver::Pinecone,
            api_key_env: "RAGQA_TEST_MISSING_PINECONE_KEY".to_string(),
            ..Default::default()
        };
        match resolve_vector_store(&config) {
            Err(ConfigError::MissingCredential { var }) => {
                assert_eq!(var, "RAGQA_TEST_MISSING_PINECONE_KEY")
            }
            other => panic!("expected missing credential, got {:?}", other),
        }
    }

    #[test]
    fn test_pinecone_resolves_with_credential() {
        // SAFETY: variable is unique to this test
        unsafe { std::env::set_var("RAGQA_TEST_PINECONE_KEY", " pc-key ") };
        let config = VectorStoreConfig {
            driver: VectorDriver::Pinecone,
            api_key_env: "RAGQA_TEST_PINECONE_KEY".to_string(),
            namespace: "docs".to_string(),
            ..Default::default()
        };
        let handle = resolve_vector_store(&config).unwrap();
        assert_eq!(handle.store().backend(), "pinecone");
        assert_eq!(handle.collection().namespace, "docs");
        assert_eq!(handle.collection().dimension, 768);
    }

    #[test]
    fn test_memory_needs_no_credential() {
        let config = VectorStoreConfig {
            driver: VectorDriver::Memory,
            api_key_env: "RAGQA_TEST_NEVER_SET".to_string(),
            ..Default::default()
        };
        let handle = resolve_vector_store(&config).unwrap();
        assert_eq!(handle.store().backend(), "memory");
        assert_eq!(handle.collection().index_name, "quickstart");
    }

    #[tokio::test]
    async fn test_writer_batches_and_counts() {
        let store = Arc::new(MemoryStore::new(collection()));
        let writer = DocumentWriter::new(store.clone(), Duration::from_secs(5)).with_batch_size(2);

        let written = writer.run(&embedded(5)).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_writer_reports_progress_on_failure() {
        let store = Arc::new(FlakyStore::new(collection(), 2));
        let writer = DocumentWriter::new(store, Duration::from_secs(5))
            .with_batch_size(2)
            .with_retry(RetryConfig::none());

        match writer.run(&embedded(6)).await {
            Err(IngestionError::Stage {
                stage, processed, ..
            }) => {
                assert_eq!(stage, IngestStage::Write);
                assert_eq!(processed, 4);
            }
            other => panic!("expected write stage failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_clear_reports_removed() {
        let store = Arc::new(MemoryStore::new(collection()));
        let writer = DocumentWriter::new(store.clone(), Duration::from_secs(5));
        writer.run(&embedded(3)).await.unwrap();

        assert_eq!(writer.clear().await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(writer.clear().await.unwrap(), 0);
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let docs = [0.2, 0.9, 0.5]
            .iter()
            .map(|s| ScoredDocument::new(Document::new(format!("{}", s), Default::default()), *s))
            .collect();
        let ranked = rank(docs, 2);
        assert_eq!(ranked.len(), 2);
        assert!((ranked[0].score - 0.9).abs() < f32::EPSILON);
        assert!((ranked[1].score - 0.5).abs() < f32::EPSILON);
    }
}
