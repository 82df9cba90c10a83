//! The question-answering system: ingestion, cached answering, and
//! retrieval behind one handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, EmbeddingError, IngestionError, QueryError};
use crate::models::{
    Config, EnvironmentInfo, IngestReport, RetrievalResults, ScoredDocument, environment_info,
};
use crate::pipelines::{
    CacheState, IngestStage, IngestionPipeline, NO_DOCUMENTS_MESSAGE, PipelineCache,
    QueryOutcome, QueryStage, RagPipeline, RetrievalPipeline,
};
use crate::services::{
    DocumentWriter, OpenAiGenerator, SharedEmbedder, SharedGenerator, SharedVectorStore,
    create_embedder, resolve_vector_store,
};
use crate::sources::DocumentLoader;

/// Supplies the components pipelines are assembled from.
pub trait PipelineFactory: Send + Sync {
    fn config(&self) -> &Config;

    /// Fails when the store's credential is missing.
    fn vector_store(&self) -> Result<SharedVectorStore, ConfigError>;

    fn embedder(&self) -> Result<SharedEmbedder, EmbeddingError>;

    /// Fails when the generation credential is missing.
    fn generator(&self) -> Result<SharedGenerator, ConfigError>;
}

/// Builds production components from [`Config`].
///
/// The store and embedder are created once and shared by every pipeline so
/// ingestion and querying use the same model and connection pool.
pub struct ConfigFactory {
    config: Config,
    store: OnceLock<SharedVectorStore>,
    embedder: OnceLock<SharedEmbedder>,
}

impl ConfigFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: OnceLock::new(),
            embedder: OnceLock::new(),
        }
    }
}

impl PipelineFactory for ConfigFactory {
    fn config(&self) -> &Config {
        &self.config
    }

    fn vector_store(&self) -> Result<SharedVectorStore, ConfigError> {
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }
        let handle = resolve_vector_store(&self.config.vector_store)?;
        Ok(Arc::clone(
            self.store.get_or_init(|| Arc::clone(handle.store())),
        ))
    }

    fn embedder(&self) -> Result<SharedEmbedder, EmbeddingError> {
        if let Some(embedder) = self.embedder.get() {
            return Ok(Arc::clone(embedder));
        }
        let embedder = create_embedder(&self.config.embedding)?;
        Ok(Arc::clone(self.embedder.get_or_init(|| embedder)))
    }

    fn generator(&self) -> Result<SharedGenerator, ConfigError> {
        Ok(Arc::new(OpenAiGenerator::from_config(
            &self.config.generation,
        )?))
    }
}

/// Snapshot of the system for `status` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub environment: EnvironmentInfo,
    pub vector_backend: String,
    pub index_name: String,
    pub namespace: String,
    pub dimension: usize,
    pub embedding_model: String,
    pub generation_model: String,
    /// `None` when the store could not be built or reached
    pub store_reachable: Option<bool>,
    pub vector_count: Option<u64>,
    pub store_error: Option<String>,
    pub pipeline_ready: bool,
    pub pipeline_constructions: u64,
}

pub struct QaSystem {
    factory: Arc<dyn PipelineFactory>,
    pipeline: PipelineCache<RagPipeline>,
}

impl QaSystem {
    pub fn new(config: Config) -> Self {
        Self::with_factory(Arc::new(ConfigFactory::new(config)))
    }

    pub fn with_factory(factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            factory,
            pipeline: PipelineCache::new(),
        }
    }

    /// Load `.env`, then the config file (or defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self::new(Config::load()?))
    }

    pub fn config(&self) -> &Config {
        self.factory.config()
    }

    /// Load `path` (a file or a directory) and write it to the vector store.
    ///
    /// `file_types` overrides the configured extensions for this call. The
    /// store credential is checked before the filesystem is touched.
    pub async fn ingest_documents(
        &self,
        path: impl AsRef<Path>,
        file_types: Option<&[String]>,
    ) -> Result<IngestReport, IngestionError> {
        let start = Instant::now();
        let config = self.factory.config();
        let store = self.factory.vector_store()?;
        info!(backend = store.backend(), "vector store initialized");

        let loader = match file_types {
            Some(types) => DocumentLoader::new(types, config.ingestion.max_file_size),
            None => DocumentLoader::from_config(&config.ingestion),
        };
        let path: PathBuf = path.as_ref().to_path_buf();
        let path_display = path.display().to_string();
        let outcome = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| IngestionError::Task(e.to_string()))??;

        let loaded = outcome.documents.len();
        let (skipped, failed) = (outcome.skipped.len(), outcome.failed.len());
        info!(documents = loaded, skipped, failed, "loaded documents");

        let mut report = if outcome.is_empty() {
            warn!(path = %path_display, "{}", NO_DOCUMENTS_MESSAGE);
            IngestReport::warning(NO_DOCUMENTS_MESSAGE)
        } else {
            let pipeline = IngestionPipeline::from_config(config, self.ingest_embedder()?, store);
            pipeline.warm_up().await?;
            pipeline.run(outcome.documents).await?
        };

        report.documents_loaded = loaded;
        report.files_skipped = skipped;
        report.files_failed = failed;
        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Delete every vector in the configured namespace. Returns how many
    /// were stored.
    pub async fn clear_namespace(&self) -> Result<u64, IngestionError> {
        let store = self.factory.vector_store()?;
        let removed = DocumentWriter::from_config(self.config(), store).clear().await?;
        warn!(
            namespace = %self.config().vector_store.namespace,
            removed,
            "namespace cleared"
        );
        Ok(removed)
    }

    fn ingest_embedder(&self) -> Result<SharedEmbedder, IngestionError> {
        self.factory
            .embedder()
            .map_err(|e| IngestionError::Stage {
                stage: IngestStage::Embed,
                processed: 0,
                source: e.into(),
            })
    }

    async fn build_pipeline(&self) -> Result<RagPipeline, QueryError> {
        let store = self.factory.vector_store()?;
        let generator = self.factory.generator()?;
        let embedder = self
            .factory
            .embedder()
            .map_err(|e| QueryError::stage(QueryStage::EmbedQuery, e))?;

        let pipeline = RagPipeline::from_config(self.config(), embedder, store, generator)?;
        pipeline.warm_up().await?;
        Ok(pipeline)
    }

    /// Build and warm the query pipeline ahead of the first question.
    pub async fn warm_up(&self) -> Result<(), QueryError> {
        self.pipeline
            .get_or_try_init(|| self.build_pipeline())
            .await
            .map(|_| ())
    }

    /// Answer `question` with the cached pipeline, building it on first use.
    pub async fn answer(&self, question: &str) -> QueryOutcome {
        if question.trim().is_empty() {
            return QueryOutcome::EmptyQuestion;
        }

        match self
            .pipeline
            .get_or_try_init(|| self.build_pipeline())
            .await
        {
            Ok(pipeline) => pipeline.answer(question).await,
            Err(e) => {
                warn!(error = %e, "failed to build query pipeline");
                QueryOutcome::Failed(e)
            }
        }
    }

    /// Always returns a displayable string; failures become an apology.
    pub async fn get_result(&self, question: &str) -> String {
        self.answer(question).await.into_message()
    }

    /// The `top_k` nearest documents (default `retrieval.debug_top_k`),
    /// without generating an answer.
    ///
    /// Reuses the cached pipeline's retrieval half when it is built;
    /// otherwise runs a one-off retrieval that needs no generation
    /// credential.
    pub async fn retrieve_documents(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<RetrievalResults, QueryError> {
        let start = Instant::now();
        let top_k = top_k.unwrap_or(self.config().retrieval.debug_top_k);
        let question = question.trim();
        if question.is_empty() || top_k == 0 {
            return Ok(RetrievalResults::new(question, Vec::new(), 0));
        }

        let documents: Vec<ScoredDocument> = match self.pipeline.get().await {
            Some(pipeline) => pipeline.retrieval().run_with_top_k(question, top_k).await?,
            None => {
                let embedder = self
                    .factory
                    .embedder()
                    .map_err(|e| QueryError::stage(QueryStage::EmbedQuery, e))?;
                let retrieval = RetrievalPipeline::from_config(
                    self.config(),
                    embedder,
                    self.factory.vector_store()?,
                    top_k,
                );
                retrieval.warm_up().await?;
                retrieval.run(question).await?
            }
        };

        Ok(RetrievalResults::new(
            question,
            documents,
            start.elapsed().as_millis() as u64,
        ))
    }

    /// Drop the cached pipeline; the next question rebuilds it.
    pub async fn refresh(&self) -> bool {
        self.pipeline.reset().await
    }

    pub async fn pipeline_state(&self) -> CacheState {
        self.pipeline.state().await
    }

    pub fn pipeline_constructions(&self) -> u64 {
        self.pipeline.constructions()
    }

    pub fn environment_info(&self) -> EnvironmentInfo {
        environment_info()
    }

    pub async fn status(&self) -> SystemStatus {
        let config = self.config();
        let mut status = SystemStatus {
            environment: self.environment_info(),
            vector_backend: config.vector_store.driver.to_string(),
            index_name: config.vector_store.index_name.clone(),
            namespace: config.vector_store.namespace.clone(),
            dimension: config.vector_store.dimension,
            embedding_model: config.embedding.model_id.clone(),
            generation_model: config.generation.model.clone(),
            store_reachable: None,
            vector_count: None,
            store_error: None,
            pipeline_ready: self.pipeline_state().await == CacheState::Ready,
            pipeline_constructions: self.pipeline_constructions(),
        };

        match self.factory.vector_store() {
            Ok(store) => {
                match store.health_check().await {
                    Ok(reachable) => status.store_reachable = Some(reachable),
                    Err(e) => status.store_error = Some(e.to_string()),
                }
                if status.store_reachable == Some(true) {
                    match store.count().await {
                        Ok(count) => status.vector_count = Some(count),
                        Err(e) => status.store_error = Some(e.to_string()),
                    }
                }
            }
            Err(e) => status.store_error = Some(e.to_string()),
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::models::IngestStatus;
    use crate::pipelines::EMPTY_QUESTION_MESSAGE;
    use crate::services::{MemoryStore, VectorStore};
    use crate::services::testing::{HashEmbedder, ScriptedGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 64;

    struct TestFactory {
        config: Config,
        store: Arc<MemoryStore>,
        embedder: Arc<HashEmbedder>,
        generator: Arc<ScriptedGenerator>,
        generator_builds: AtomicUsize,
        missing_key: bool,
    }

    impl TestFactory {
        fn new(generator: ScriptedGenerator) -> Self {
            let mut config = Config::default();
            config.embedding.dimension = DIM;
            config.vector_store.dimension = DIM;
            config.retry.max_retries = 1;
            Self {
                store: Arc::new(MemoryStore::new(config.collection())),
                config,
                embedder: Arc::new(HashEmbedder::new(DIM)),
                generator: Arc::new(generator),
                generator_builds: AtomicUsize::new(0),
                missing_key: false,
            }
        }

        fn without_generation_key(mut self) -> Self {
            self.missing_key = true;
            self
        }
    }

    impl PipelineFactory for TestFactory {
        fn config(&self) -> &Config {
            &self.config
        }

        fn vector_store(&self) -> Result<SharedVectorStore, ConfigError> {
            Ok(self.store.clone())
        }

        fn embedder(&self) -> Result<SharedEmbedder, EmbeddingError> {
            Ok(self.embedder.clone())
        }

        fn generator(&self) -> Result<SharedGenerator, ConfigError> {
            if self.missing_key {
                return Err(ConfigError::MissingCredential {
                    var: "OPENAI_API_KEY".to_string(),
                });
            }
            self.generator_builds.fetch_add(1, Ordering::SeqCst);
            Ok(self.generator.clone())
        }
    }

    fn system(generator: ScriptedGenerator) -> (QaSystem, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::new(generator));
        (QaSystem::with_factory(factory.clone()), factory)
    }

    fn write_corpus(dir: &Path) {
        std::fs::write(
            dir.join("france.txt"),
            "Paris is the capital of France. France is in Europe.",
        )
        .unwrap();
        std::fs::write(
            dir.join("rust.txt"),
            "Rust has no garbage collector. Ownership is checked at compile time.",
        )
        .unwrap();
        std::fs::write(dir.join("notes.md"), "ignored by default").unwrap();
    }

    #[tokio::test]
    async fn test_pipeline_built_once_across_questions() {
        let (qa, factory) = system(ScriptedGenerator::replying("Paris."));

        assert_eq!(qa.get_result("Capital of France?").await, "Paris.");
        assert_eq!(qa.get_result("And again?").await, "Paris.");

        assert_eq!(qa.pipeline_constructions(), 1);
        assert_eq!(factory.generator_builds.load(Ordering::SeqCst), 1);
        assert_eq!(factory.generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_question_builds_nothing() {
        let (qa, factory) = system(ScriptedGenerator::replying("unused"));

        assert_eq!(qa.get_result("").await, EMPTY_QUESTION_MESSAGE);
        assert_eq!(qa.get_result("   ").await, EMPTY_QUESTION_MESSAGE);

        assert_eq!(qa.pipeline_state().await, CacheState::Uninitialized);
        assert_eq!(factory.generator.calls(), 0);
        assert_eq!(factory.embedder.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_is_apology() {
        let (qa, _) = system(ScriptedGenerator::failing(503));
        let answer = qa.get_result("Anything?").await;
        assert!(answer.starts_with("An error occurred:"));
        assert_eq!(qa.pipeline_state().await, CacheState::Ready);
    }

    #[tokio::test]
    async fn test_missing_generation_key_is_apology_and_not_cached() {
        let factory = Arc::new(
            TestFactory::new(ScriptedGenerator::replying("x")).without_generation_key(),
        );
        let qa = QaSystem::with_factory(factory);

        let answer = qa.get_result("Anything?").await;
        assert!(answer.contains("OPENAI_API_KEY not found"));
        assert_eq!(qa.pipeline_state().await, CacheState::Uninitialized);
    }

    #[tokio::test]
    async fn test_retrieve_needs_no_generation_key() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let factory = Arc::new(
            TestFactory::new(ScriptedGenerator::replying("x")).without_generation_key(),
        );
        let qa = QaSystem::with_factory(factory);

        qa.ingest_documents(dir.path(), None).await.unwrap();
        let results = qa.retrieve_documents("capital of France", None).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(qa.pipeline_state().await, CacheState::Uninitialized);
    }

    #[tokio::test]
    async fn test_ingest_directory_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, factory) = system(ScriptedGenerator::replying("x"));

        let report = qa.ingest_documents(dir.path(), None).await.unwrap();
        assert_eq!(report.status, IngestStatus::Success);
        assert_eq!(report.documents_loaded, 2);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_failed, 0);
        assert_eq!(report.count as u64, factory.store.count().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_types_override() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, _) = system(ScriptedGenerator::replying("x"));

        let types = vec![".md".to_string()];
        let report = qa.ingest_documents(dir.path(), Some(&types)).await.unwrap();
        assert_eq!(report.documents_loaded, 1);
        assert_eq!(report.files_skipped, 2);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, factory) = system(ScriptedGenerator::replying("x"));

        qa.ingest_documents(dir.path(), None).await.unwrap();
        let first = factory.store.count().await.unwrap();
        qa.ingest_documents(dir.path(), None).await.unwrap();
        assert_eq!(factory.store.count().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_clear_namespace_then_reingest() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, factory) = system(ScriptedGenerator::replying("x"));

        qa.ingest_documents(dir.path(), None).await.unwrap();
        let stored = factory.store.count().await.unwrap();
        assert!(stored > 0);

        assert_eq!(qa.clear_namespace().await.unwrap(), stored);
        assert_eq!(factory.store.count().await.unwrap(), 0);
        let results = qa.retrieve_documents("capital of France", None).await.unwrap();
        assert!(results.is_empty());

        qa.ingest_documents(dir.path(), None).await.unwrap();
        assert_eq!(factory.store.count().await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_retrieve_caps_at_top_k() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(
                dir.path().join(format!("doc{}.txt", i)),
                format!("Document {} talks about vector search.", i),
            )
            .unwrap();
        }
        let (qa, _) = system(ScriptedGenerator::replying("x"));
        qa.ingest_documents(dir.path(), None).await.unwrap();

        let results = qa.retrieve_documents("vector search", Some(3)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            qa.retrieve_documents("vector search", None).await.unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn test_retrieve_reuses_cached_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, _) = system(ScriptedGenerator::replying("Paris."));
        qa.ingest_documents(dir.path(), None).await.unwrap();

        qa.get_result("Capital of France?").await;
        let results = qa.retrieve_documents("France", Some(1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(qa.pipeline_constructions(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_empty_question_is_empty() {
        let (qa, factory) = system(ScriptedGenerator::replying("x"));
        let results = qa.retrieve_documents("  ", Some(3)).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(factory.embedder.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let (qa, _) = system(ScriptedGenerator::replying("x"));
        let err = qa
            .ingest_documents("/nonexistent/ragqa/path", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Load(LoadError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_directory_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (qa, _) = system(ScriptedGenerator::replying("x"));
        let report = qa.ingest_documents(dir.path(), None).await.unwrap();
        assert_eq!(report.status, IngestStatus::Warning);
        assert_eq!(report.message, NO_DOCUMENTS_MESSAGE);
        assert_eq!(report.count, 0);
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_on_next_question() {
        let (qa, _) = system(ScriptedGenerator::replying("ok"));
        qa.get_result("first?").await;
        assert!(qa.refresh().await);
        qa.get_result("second?").await;
        assert_eq!(qa.pipeline_constructions(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_store_and_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (qa, _) = system(ScriptedGenerator::replying("x"));
        qa.ingest_documents(dir.path(), None).await.unwrap();

        let status = qa.status().await;
        assert_eq!(status.store_reachable, Some(true));
        assert!(status.vector_count.unwrap() > 0);
        assert!(!status.pipeline_ready);
        assert_eq!(status.namespace, "default");
    }
}
