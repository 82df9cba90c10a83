//! Result models for retrieval and ingestion.

use serde::{Deserialize, Serialize};

use super::document::Document;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// A retrieved document and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

impl ScoredDocument {
    pub fn new(document: Document, score: f32) -> Self {
        Self { document, score }
    }
}

/// Retrieval results for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResults {
    pub question: String,
    pub documents: Vec<ScoredDocument>,
    pub duration_ms: u64,
}

impl RetrievalResults {
    pub fn new(question: impl Into<String>, documents: Vec<ScoredDocument>, duration_ms: u64) -> Self {
        Self {
            question: question.into(),
            documents,
            duration_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Warning,
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestStatus::Success => write!(f, "success"),
            IngestStatus::Warning => write!(f, "warning"),
        }
    }
}

/// Outcome of an ingestion call.
///
/// `count` is the number of chunks written. The file counters describe the
/// loader pass and are zero when documents were supplied directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub message: String,
    pub count: usize,
    #[serde(default)]
    pub documents_loaded: usize,
    #[serde(default)]
    pub files_skipped: usize,
    #[serde(default)]
    pub files_failed: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn success(count: usize) -> Self {
        Self {
            status: IngestStatus::Success,
            message: format!("Ingested {} document chunks.", count),
            count,
            documents_loaded: 0,
            files_skipped: 0,
            files_failed: 0,
            duration_ms: 0,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Warning,
            message: message.into(),
            count: 0,
            documents_loaded: 0,
            files_skipped: 0,
            files_failed: 0,
            duration_ms: 0,
        }
    }
}
