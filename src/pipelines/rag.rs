use std::time::Duration;

use tracing::{debug, error, info};

use super::QueryStage;
use crate::error::{ConfigError, QueryError};
use crate::models::{Config, ScoredDocument};
use crate::services::vector_store::rank;
use crate::services::{PromptBuilder, SharedEmbedder, SharedGenerator, SharedVectorStore};
use crate::utils::retry::{RetryConfig, with_retry, with_timeout};

pub const EMPTY_QUESTION_MESSAGE: &str = "Please provide a valid question.";
pub const NO_REPLY_MESSAGE: &str = "I couldn't generate an answer. Please try again.";

/// How a question was handled.
#[derive(Debug)]
pub enum QueryOutcome {
    Answered(String),
    /// The question was empty or whitespace; nothing ran.
    EmptyQuestion,
    /// Generation succeeded but returned no candidates.
    NoReply,
    Failed(QueryError),
}

impl QueryOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, QueryOutcome::Answered(_))
    }

    /// The text shown to a user for this outcome.
    pub fn into_message(self) -> String {
        match self {
            QueryOutcome::Answered(answer) => answer,
            QueryOutcome::EmptyQuestion => EMPTY_QUESTION_MESSAGE.to_string(),
            QueryOutcome::NoReply => NO_REPLY_MESSAGE.to_string(),
            QueryOutcome::Failed(e) => format!("An error occurred: {}", e),
        }
    }
}

/// embed query -> retrieve.
pub struct RetrievalPipeline {
    embedder: SharedEmbedder,
    store: SharedVectorStore,
    top_k: usize,
    embed_timeout: Duration,
    store_timeout: Duration,
    retry: RetryConfig,
}

impl RetrievalPipeline {
    pub fn new(embedder: SharedEmbedder, store: SharedVectorStore, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k,
            embed_timeout: Duration::from_secs(120),
            store_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: SharedEmbedder,
        store: SharedVectorStore,
        top_k: usize,
    ) -> Self {
        Self {
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            store_timeout: Duration::from_secs(config.vector_store.timeout_secs),
            retry: RetryConfig::from(&config.retry),
            ..Self::new(embedder, store, top_k)
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn warm_up(&self) -> Result<(), QueryError> {
        self.embedder
            .warm_up()
            .await
            .map_err(|e| QueryError::stage(QueryStage::EmbedQuery, e))
    }

    /// The configured number of nearest documents, best first.
    pub async fn run(&self, question: &str) -> Result<Vec<ScoredDocument>, QueryError> {
        self.run_with_top_k(question, self.top_k).await
    }

    /// At most `top_k` nearest documents, best first.
    pub async fn run_with_top_k(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, QueryError> {
        let embedding = with_retry(&self.retry, "embed query", || {
            with_timeout(
                "embed query",
                self.embed_timeout,
                self.embedder.embed_query(question),
            )
        })
        .await
        .map_err(|e| QueryError::stage(QueryStage::EmbedQuery, e))?;

        let documents = with_retry(&self.retry, "vector query", || {
            with_timeout(
                "vector query",
                self.store_timeout,
                self.store.query(&embedding, top_k),
            )
        })
        .await
        .map_err(|e| QueryError::stage(QueryStage::Retrieve, e))?;

        let documents = rank(documents, top_k);
        debug!(top_k, retrieved = documents.len(), "retrieved documents");
        Ok(documents)
    }
}

/// retrieval -> build prompt -> generate.
pub struct RagPipeline {
    retrieval: RetrievalPipeline,
    prompt: PromptBuilder,
    generator: SharedGenerator,
    generation_timeout: Duration,
    retry: RetryConfig,
}

impl RagPipeline {
    pub fn new(
        retrieval: RetrievalPipeline,
        prompt: PromptBuilder,
        generator: SharedGenerator,
    ) -> Self {
        Self {
            retrieval,
            prompt,
            generator,
            generation_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: SharedEmbedder,
        store: SharedVectorStore,
        generator: SharedGenerator,
    ) -> Result<Self, ConfigError> {
        let retrieval =
            RetrievalPipeline::from_config(config, embedder, store, config.retrieval.top_k);
        let prompt = PromptBuilder::from_template(config.generation.template.as_deref())?;
        Ok(Self {
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
            retry: RetryConfig::from(&config.retry),
            ..Self::new(retrieval, prompt, generator)
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry.clone();
        self.retrieval = self.retrieval.with_retry(retry);
        self
    }

    pub fn retrieval(&self) -> &RetrievalPipeline {
        &self.retrieval
    }

    pub async fn warm_up(&self) -> Result<(), QueryError> {
        self.retrieval.warm_up().await
    }

    /// Answer `question`. Never panics and never returns an error: failures
    /// become [`QueryOutcome::Failed`].
    pub async fn answer(&self, question: &str) -> QueryOutcome {
        let question = question.trim();
        if question.is_empty() {
            return QueryOutcome::EmptyQuestion;
        }

        match self.generate(question).await {
            Ok(Some(answer)) => QueryOutcome::Answered(answer),
            Ok(None) => {
                info!(model = self.generator.model(), "generator returned no replies");
                QueryOutcome::NoReply
            }
            Err(e) => {
                error!(error = %e, timeout = e.is_timeout(), "query failed");
                QueryOutcome::Failed(e)
            }
        }
    }

    async fn generate(&self, question: &str) -> Result<Option<String>, QueryError> {
        let documents = self.retrieval.run(question).await?;
        let prompt = self
            .prompt
            .build(question, documents.iter().map(|d| &d.document));

        let replies = with_retry(&self.retry, "chat completion", || {
            with_timeout(
                "chat completion",
                self.generation_timeout,
                self.generator.generate(&prompt),
            )
        })
        .await
        .map_err(|e| QueryError::stage(QueryStage::Generate, e))?;

        Ok(replies.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StageFailure, VectorStoreError};
    use crate::models::{Document, Metric, VectorCollection};
    use crate::services::testing::{FlakyStore, HashEmbedder, ScriptedGenerator};
    use crate::services::embedding::Embedder;
    use crate::services::{MemoryStore, VectorStore};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    const DIM: usize = 64;

    async fn seeded_store(embedder: &HashEmbedder, texts: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(VectorCollection::new(
            "test",
            "default",
            DIM,
            Metric::Cosine,
        )));
        let docs: Vec<Document> = texts
            .iter()
            .map(|t| {
                let mut doc = Document::new(*t, Default::default());
                doc.embedding = embedder.vector(t);
                doc
            })
            .collect();
        store.upsert(&docs).await.unwrap();
        store
    }

    async fn pipeline(generator: Arc<ScriptedGenerator>) -> RagPipeline {
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let store = seeded_store(
            &embedder,
            &[
                "Paris is the capital of France.",
                "Berlin is the capital of Germany.",
                "Rust has no garbage collector.",
                "Tokio is an async runtime.",
            ],
        )
        .await;
        let retrieval = RetrievalPipeline::new(embedder, store, 3);
        let pipeline = RagPipeline::new(retrieval, PromptBuilder::default(), generator)
            .with_retry(RetryConfig::none());
        pipeline.warm_up().await.unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_answer_uses_first_reply_and_context() {
        let generator = Arc::new(ScriptedGenerator::replying("Paris."));
        let pipeline = pipeline(generator.clone()).await;

        let outcome = pipeline.answer("What is the capital of France?").await;
        assert_eq!(outcome.into_message(), "Paris.");

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Paris is the capital of France."));
        assert!(prompts[0].contains("Question: What is the capital of France?"));
    }

    #[tokio::test]
    async fn test_empty_question_short_circuits() {
        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let pipeline = pipeline(generator.clone()).await;

        for question in ["", "   ", "\n\t"] {
            assert!(matches!(
                pipeline.answer(question).await,
                QueryOutcome::EmptyQuestion
            ));
        }
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_replies_is_distinct_from_failure() {
        let pipeline = pipeline(Arc::new(ScriptedGenerator::silent())).await;
        let outcome = pipeline.answer("Anything?").await;
        assert!(matches!(outcome, QueryOutcome::NoReply));
        assert_eq!(outcome.into_message(), NO_REPLY_MESSAGE);
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_outcome() {
        let pipeline = pipeline(Arc::new(ScriptedGenerator::failing(503))).await;
        match pipeline.answer("Anything?").await {
            QueryOutcome::Failed(QueryError::Stage { stage, .. }) => {
                assert_eq!(stage, QueryStage::Generate)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_generation_failure_is_retried() {
        let generator = Arc::new(ScriptedGenerator::failing(503));
        let pipeline = pipeline(generator.clone()).await.with_retry(
            RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)),
        );
        let outcome = pipeline.answer("Anything?").await;
        assert!(outcome.into_message().starts_with("An error occurred:"));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_retrieval_caps_at_top_k() {
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let texts: Vec<String> = (0..10).map(|i| format!("rust fact {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let store = seeded_store(&embedder, &refs).await;

        let retrieval = RetrievalPipeline::new(embedder, store, 3);
        retrieval.warm_up().await.unwrap();

        let docs = retrieval.run("rust fact").await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(retrieval.run_with_top_k("rust fact", 5).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_store_failure_is_retrieve_stage() {
        let embedder = Arc::new(HashEmbedder::new(DIM));
        embedder.warm_up().await.unwrap();
        let store = Arc::new(FailingQueryStore);
        let retrieval = RetrievalPipeline::new(embedder.clone(), store, 3)
            .with_retry(RetryConfig::none());

        match retrieval.run("hello").await {
            Err(QueryError::Stage {
                stage: QueryStage::Retrieve,
                source: StageFailure::VectorStore(_),
            }) => {}
            other => panic!("expected retrieve failure, got {:?}", other),
        }
        assert_eq!(embedder.query_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unwarmed_embedder_fails_embed_stage() {
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let store = Arc::new(FlakyStore::new(
            VectorCollection::new("t", "default", DIM, Metric::Cosine),
            0,
        ));
        let retrieval = RetrievalPipeline::new(embedder, store, 3);
        let err = retrieval.run("hello").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Stage {
                stage: QueryStage::EmbedQuery,
                ..
            }
        ));
    }

    struct FailingQueryStore;

    #[async_trait::async_trait]
    impl VectorStore for FailingQueryStore {
        fn backend(&self) -> &'static str {
            "failing"
        }

        fn collection(&self) -> &VectorCollection {
            static COLLECTION: std::sync::OnceLock<VectorCollection> = std::sync::OnceLock::new();
            COLLECTION.get_or_init(VectorCollection::default)
        }

        async fn health_check(&self) -> Result<bool, VectorStoreError> {
            Ok(false)
        }

        async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn upsert(&self, _: &[Document]) -> Result<usize, VectorStoreError> {
            Ok(0)
        }

        async fn query(&self, _: &[f32], _: usize) -> Result<Vec<ScoredDocument>, VectorStoreError> {
            Err(VectorStoreError::Unauthorized("bad key".to_string()))
        }

        async fn count(&self) -> Result<u64, VectorStoreError> {
            Ok(0)
        }

        async fn delete_all(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }
    }
}
