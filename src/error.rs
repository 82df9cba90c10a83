//! Error types for the question-answering system.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipelines::{IngestStage, QueryStage};
use crate::utils::retry::Retryable;

/// Errors related to configuration and credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("{var} not found. Please set it in your .env file or environment variables")]
    MissingCredential { var: String },
}

/// Errors raised while turning files into documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("unsupported file type: {extension:?} ({})", path.display())]
    UnsupportedType { path: PathBuf, extension: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract text from {}: {message}", path.display())]
    Pdf { path: PathBuf, message: String },
}

/// Errors from the local ONNX embedding model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("model load error: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("inference error: {0}")]
    InferenceError(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,

    #[error("embedder {0} used before warm_up()")]
    NotWarmedUp(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_)
            | EmbeddingError::NotWarmedUp(_)
            | EmbeddingError::DimensionMismatch { .. }
            | EmbeddingError::Model(_) => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("vector store returned status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("vector store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("vector store client error: {0}")]
    ClientError(String),
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::ServerError { status, .. } => *status == 429 || *status >= 500,
            VectorStoreError::Unauthorized(_) => false,
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::SearchError(msg)
            | VectorStoreError::DeleteError(msg)
            | VectorStoreError::ClientError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
        }
    }
}

/// Errors from the language-model completion call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to reach generation provider: {0}")]
    ConnectionError(String),

    #[error("generation provider returned status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("generation request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::ConnectionError(_) => true,
            GenerationError::ServerError { status, .. } => *status == 429 || *status >= 500,
            GenerationError::RequestError(e) => e.is_timeout() || e.is_connect(),
            GenerationError::InvalidResponse(_) => false,
        }
    }
}

/// Why a single pipeline stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl StageFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StageFailure::Timeout { .. })
    }
}

impl Retryable for StageFailure {
    fn is_retryable(&self) -> bool {
        match self {
            StageFailure::Embedding(e) => e.is_retryable(),
            StageFailure::VectorStore(e) => e.is_retryable(),
            StageFailure::Generation(e) => e.is_retryable(),
            StageFailure::Timeout { .. } => true,
        }
    }
}

/// Errors surfaced by an ingestion call.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{stage} stage failed after {processed} documents: {source}")]
    Stage {
        stage: IngestStage,
        processed: usize,
        #[source]
        source: StageFailure,
    },

    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Errors inside the retrieval-generation path.
///
/// `get_result` never returns these; they are turned into a user-facing
/// message. `answer` and `retrieve_documents` expose them.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: QueryStage,
        #[source]
        source: StageFailure,
    },
}

impl QueryError {
    pub fn stage(stage: QueryStage, source: impl Into<StageFailure>) -> Self {
        QueryError::Stage {
            stage,
            source: source.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Stage { source, .. } if source.is_timeout())
    }
}

/// Errors talking to the background query daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon is not running")]
    NotRunning,

    #[error("failed to connect to daemon: {0}")]
    ConnectionFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("failed to spawn daemon: {0}")]
    SpawnError(String),

    #[error("daemon did not become ready in time")]
    Timeout,

    #[error("daemon request failed: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
