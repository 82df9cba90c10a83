//! Ingestion and question-answering pipelines.
//!
//! Both pipelines are fixed chains of typed stages: each stage consumes the
//! previous stage's output directly.

mod cache;
mod ingestion;
mod rag;

pub use cache::{CacheState, PipelineCache};
pub use ingestion::{IngestionPipeline, NO_DOCUMENTS_MESSAGE};
pub use rag::{
    EMPTY_QUESTION_MESSAGE, NO_REPLY_MESSAGE, QueryOutcome, RagPipeline, RetrievalPipeline,
};

use std::fmt;

use serde::Serialize;

/// Stages of the ingestion pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Clean,
    Split,
    Embed,
    Write,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStage::Clean => write!(f, "clean"),
            IngestStage::Split => write!(f, "split"),
            IngestStage::Embed => write!(f, "embed"),
            IngestStage::Write => write!(f, "write"),
        }
    }
}

/// Stages of the retrieval-generation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    EmbedQuery,
    Retrieve,
    BuildPrompt,
    Generate,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStage::EmbedQuery => write!(f, "embed query"),
            QueryStage::Retrieve => write!(f, "retrieve"),
            QueryStage::BuildPrompt => write!(f, "build prompt"),
            QueryStage::Generate => write!(f, "generate"),
        }
    }
}
