mod collection;
mod config;
mod document;
mod search;

pub use collection::{Metric, VectorCollection};
pub use config::{
    Config, DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL,
    DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE, DaemonConfig, EmbeddingBackend, EmbeddingConfig,
    EnvironmentInfo, GenerationConfig, IngestionConfig, RetrievalConfig, RetryConfigSection,
    VectorDriver, VectorStoreConfig, environment_info, optional_credential, require_credential,
};
pub use document::{
    Document, META_FILE_TYPE, META_FILENAME, META_PAGE_NUMBER, META_SOURCE, META_SOURCE_ID,
    META_SPLIT_ID, META_SPLIT_IDX_START, MetaValue, Metadata,
};
pub use search::{IngestReport, IngestStatus, OutputFormat, RetrievalResults, ScoredDocument};
