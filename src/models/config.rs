use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::collection::{Metric, VectorCollection};
use crate::error::ConfigError;

pub const DEFAULT_INDEX_NAME: &str = "quickstart";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_DIMENSION: usize = 768;
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-mpnet-base-v2";
pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_GENERATION_URL: &str = "https://api.openai.com/v1";
pub const PINECONE_API_KEY_ENV: &str = "PINECONE_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub retry: RetryConfigSection,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragqa").join("config.toml"))
    }

    pub fn models_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("ragqa").join("models"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Reject settings that would only fail later, deep inside a pipeline run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingestion = &self.ingestion;
        if ingestion.split_length == 0 {
            return Err(ConfigError::ValidationError(
                "ingestion.split_length must be at least 1".to_string(),
            ));
        }
        if ingestion.split_overlap >= ingestion.split_length {
            return Err(ConfigError::ValidationError(format!(
                "ingestion.split_overlap ({}) must be smaller than split_length ({})",
                ingestion.split_overlap, ingestion.split_length
            )));
        }
        if self.retrieval.top_k == 0 || self.retrieval.debug_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k and retrieval.debug_top_k must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension != self.vector_store.dimension {
            return Err(ConfigError::ValidationError(format!(
                "embedding.dimension ({}) does not match vector_store.dimension ({})",
                self.embedding.dimension, self.vector_store.dimension
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn collection(&self) -> VectorCollection {
        VectorCollection::new(
            self.vector_store.index_name.clone(),
            self.vector_store.namespace.clone(),
            self.vector_store.dimension,
            self.vector_store.metric,
        )
    }

    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(|| runtime_dir().join("ragqa.sock"))
    }

    /// Sits next to the socket.
    pub fn pid_path(&self) -> PathBuf {
        self.socket_path().with_extension("pid")
    }
}

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX model loaded in-process
    #[default]
    Onnx,
    /// Remote embedding server exposing `/embed`
    Http,
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingBackend::Onnx => write!(f, "onnx"),
            EmbeddingBackend::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    #[serde(default = "default_embedding_model")]
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_max_tokens() -> u32 {
    384
}

fn default_batch_size() -> u32 {
    32
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_timeout() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model_id: default_embedding_model(),
            model_path: None,
            dimension: default_dimension(),
            max_tokens: default_max_tokens(),
            batch_size: default_batch_size(),
            url: default_embedding_url(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub fn resolve_model_dir(&self) -> Option<PathBuf> {
        self.model_path.clone().or_else(|| {
            Config::models_dir().map(|dir| dir.join(self.model_id.replace('/', "--")))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Pinecone,
    Qdrant,
    Memory,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Pinecone => write!(f, "pinecone"),
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub metric: Metric,

    /// Qdrant endpoint; unused by the other drivers
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Environment variable holding the store credential
    #[serde(default = "default_pinecone_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_cloud")]
    pub cloud: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Pinecone control plane override, e.g. a pinecone-local emulator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// How long a newly created index may take to become ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_pinecone_key_env() -> String {
    PINECONE_API_KEY_ENV.to_string()
}

fn default_cloud() -> String {
    "aws".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_store_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    120
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            index_name: default_index_name(),
            namespace: default_namespace(),
            dimension: default_dimension(),
            metric: Metric::default(),
            url: default_qdrant_url(),
            api_key_env: default_pinecone_key_env(),
            cloud: default_cloud(),
            region: default_region(),
            control_url: None,
            timeout_secs: default_store_timeout(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,

    #[serde(default = "default_split_length")]
    pub split_length: usize,

    #[serde(default = "default_split_overlap")]
    pub split_overlap: usize,

    #[serde(default = "default_true")]
    pub remove_empty_lines: bool,

    #[serde(default = "default_true")]
    pub remove_extra_whitespaces: bool,

    #[serde(default)]
    pub remove_repeated_substrings: bool,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_file_types() -> Vec<String> {
    vec![".txt".to_string(), ".pdf".to_string()]
}

fn default_split_length() -> usize {
    5
}

fn default_split_overlap() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            file_types: default_file_types(),
            split_length: default_split_length(),
            split_overlap: default_split_overlap(),
            remove_empty_lines: true,
            remove_extra_whitespaces: true,
            remove_repeated_substrings: false,
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Documents handed to the generator per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents returned by retrieval-only calls
    #[serde(default = "default_debug_top_k")]
    pub debug_top_k: usize,
}

fn default_top_k() -> usize {
    3
}

fn default_debug_top_k() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            debug_top_k: default_debug_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_generation_url")]
    pub base_url: String,

    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Prompt template override; must contain `{context}` and `{question}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_generation_url() -> String {
    DEFAULT_GENERATION_URL.to_string()
}

fn default_openai_key_env() -> String {
    OPENAI_API_KEY_ENV.to_string()
}

fn default_generation_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_generation_timeout() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            base_url: default_generation_url(),
            api_key_env: default_openai_key_env(),
            max_tokens: default_generation_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfigSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetryConfigSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Zero keeps the daemon running until stopped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

fn default_idle_timeout() -> u64 {
    1800
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            socket_path: None,
        }
    }
}

/// Which credentials are visible to the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub pinecone_api_key_set: bool,
    pub openai_api_key_set: bool,
    pub groq_api_key_set: bool,
    pub environment: String,
}

/// Value of `var` with surrounding whitespace removed, if set and non-blank.
pub fn optional_credential(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Like [`optional_credential`], but a missing value is a configuration error.
pub fn require_credential(var: &str) -> Result<String, ConfigError> {
    optional_credential(var).ok_or_else(|| ConfigError::MissingCredential {
        var: var.to_string(),
    })
}

pub fn environment_info() -> EnvironmentInfo {
    let is_set = |key: &str| optional_credential(key).is_some();
    EnvironmentInfo {
        pinecone_api_key_set: is_set(PINECONE_API_KEY_ENV),
        openai_api_key_set: is_set(OPENAI_API_KEY_ENV),
        groq_api_key_set: is_set(GROQ_API_KEY_ENV),
        environment: std::env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string()),
    }
}
