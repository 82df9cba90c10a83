use std::time::Duration;

use tracing::{info, warn};

use super::IngestStage;
use crate::error::IngestionError;
use crate::models::{Config, Document, IngestReport};
use crate::services::{
    DocumentCleaner, DocumentEmbedder, DocumentSplitter, DocumentWriter, SharedEmbedder,
    SharedVectorStore,
};
use crate::utils::retry::RetryConfig;

pub const NO_DOCUMENTS_MESSAGE: &str = "No documents found to ingest.";
const NOTHING_WRITTEN_MESSAGE: &str = "Documents contained no text to ingest.";

/// clean -> split -> embed -> write.
pub struct IngestionPipeline {
    cleaner: DocumentCleaner,
    splitter: DocumentSplitter,
    embedder: DocumentEmbedder,
    writer: DocumentWriter,
}

impl IngestionPipeline {
    pub fn new(
        cleaner: DocumentCleaner,
        splitter: DocumentSplitter,
        embedder: DocumentEmbedder,
        writer: DocumentWriter,
    ) -> Self {
        Self {
            cleaner,
            splitter,
            embedder,
            writer,
        }
    }

    /// Assemble the stages from configuration around an embedder and a store.
    pub fn from_config(config: &Config, embedder: SharedEmbedder, store: SharedVectorStore) -> Self {
        let retry = RetryConfig::from(&config.retry);
        Self::new(
            DocumentCleaner::from_config(&config.ingestion),
            DocumentSplitter::from_config(&config.ingestion),
            DocumentEmbedder::new(
                embedder,
                config.embedding.batch_size as usize,
                Duration::from_secs(config.embedding.timeout_secs),
            )
            .with_retry(retry),
            DocumentWriter::from_config(config, store),
        )
    }

    /// Load the embedding model ahead of the first run.
    pub async fn warm_up(&self) -> Result<(), IngestionError> {
        self.embedder
            .embedder()
            .warm_up()
            .await
            .map_err(|e| IngestionError::Stage {
                stage: IngestStage::Embed,
                processed: 0,
                source: e.into(),
            })
    }

    /// Run every stage over `documents`.
    ///
    /// An empty input, or one that cleans down to nothing, is a warning
    /// report rather than an error.
    pub async fn run(&self, documents: Vec<Document>) -> Result<IngestReport, IngestionError> {
        if documents.is_empty() {
            warn!("{}", NO_DOCUMENTS_MESSAGE);
            return Ok(IngestReport::warning(NO_DOCUMENTS_MESSAGE));
        }
        let received = documents.len();

        let cleaned = self.cleaner.run(documents);
        let chunks = self.splitter.run(cleaned);
        if chunks.is_empty() {
            warn!(documents = received, "{}", NOTHING_WRITTEN_MESSAGE);
            return Ok(IngestReport::warning(NOTHING_WRITTEN_MESSAGE));
        }
        let chunk_count = chunks.len();

        let embedded = self.embedder.run(chunks).await?;
        let written = self.writer.run(&embedded).await?;

        info!(documents = received, chunks = chunk_count, written, "ingestion complete");
        if written == 0 {
            return Ok(IngestReport::warning(NOTHING_WRITTEN_MESSAGE));
        }
        Ok(IngestReport::success(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;
    use crate::models::{IngestStatus, Metric, VectorCollection};
    use crate::services::testing::{FlakyStore, HashEmbedder};
    use crate::services::{MemoryStore, VectorStore};
    use std::sync::Arc;

    const DIM: usize = 32;

    fn collection() -> VectorCollection {
        VectorCollection::new("test", "default", DIM, Metric::Cosine)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.embedding.dimension = DIM;
        config.vector_store.dimension = DIM;
        config.retry.max_retries = 1;
        config
    }

    fn document(sentences: usize) -> Document {
        let text = (1..=sentences)
            .map(|i| format!("Fact number {} about rust.", i))
            .collect::<Vec<_>>()
            .join(" ");
        Document::from_file(text, "/data/facts.txt", "facts.txt")
    }

    #[tokio::test]
    async fn test_empty_input_is_warning() {
        let store = Arc::new(MemoryStore::new(collection()));
        let pipeline =
            IngestionPipeline::from_config(&config(), Arc::new(HashEmbedder::new(DIM)), store);
        let report = pipeline.run(Vec::new()).await.unwrap();
        assert_eq!(report.status, IngestStatus::Warning);
        assert_eq!(report.message, NO_DOCUMENTS_MESSAGE);
        assert_eq!(report.count, 0);
    }

    #[tokio::test]
    async fn test_blank_documents_are_warning() {
        let store = Arc::new(MemoryStore::new(collection()));
        let pipeline =
            IngestionPipeline::from_config(&config(), Arc::new(HashEmbedder::new(DIM)), store);
        let blank = Document::from_file("  \n\n  ", "/data/blank.txt", "blank.txt");
        let report = pipeline.run(vec![blank]).await.unwrap();
        assert_eq!(report.status, IngestStatus::Warning);
    }

    #[tokio::test]
    async fn test_writes_one_vector_per_chunk() {
        let store = Arc::new(MemoryStore::new(collection()));
        let pipeline = IngestionPipeline::from_config(
            &config(),
            Arc::new(HashEmbedder::new(DIM)),
            store.clone(),
        );

        // 10 sentences -> 3 chunks, 1 sentence -> 1 chunk
        let report = pipeline
            .run(vec![document(10), document(1)])
            .await
            .unwrap();
        assert_eq!(report.status, IngestStatus::Success);
        assert_eq!(report.count, 4);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = Arc::new(MemoryStore::new(collection()));
        let pipeline = IngestionPipeline::from_config(
            &config(),
            Arc::new(HashEmbedder::new(DIM)),
            store.clone(),
        );

        pipeline.run(vec![document(9)]).await.unwrap();
        let first = store.count().await.unwrap();
        pipeline.run(vec![document(9)]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_write_failure_names_stage() {
        let store = Arc::new(FlakyStore::new(collection(), 0));
        let pipeline =
            IngestionPipeline::from_config(&config(), Arc::new(HashEmbedder::new(DIM)), store);

        match pipeline.run(vec![document(3)]).await {
            Err(IngestionError::Stage {
                stage: IngestStage::Write,
                processed: 0,
                source: StageFailure::VectorStore(_),
            }) => {}
            other => panic!("expected write stage failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_width_mismatch_fails_write_stage() {
        let store = Arc::new(MemoryStore::new(collection()));
        let pipeline =
            IngestionPipeline::from_config(&config(), Arc::new(HashEmbedder::new(8)), store);

        // the embedder is self-consistent at 8, the collection expects 32
        let err = pipeline.run(vec![document(2)]).await.unwrap_err();
        assert!(matches!(
            err,
            IngestionError::Stage {
                stage: IngestStage::Write,
                ..
            }
        ));
    }
}
