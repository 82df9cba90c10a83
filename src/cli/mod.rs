//! Command-line interface for ingesting documents and asking questions.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Question answering over your own documents.
#[derive(Debug, Parser)]
#[command(name = "ragqa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load, split, embed and store documents from a file or directory
    Ingest(commands::IngestArgs),

    /// Answer a question from the stored documents
    Ask(commands::AskArgs),

    /// Show the documents closest to a question, without answering
    Retrieve(commands::RetrieveArgs),

    /// Delete every stored vector in the configured namespace
    Clear(commands::ClearArgs),

    /// Check credentials, vector store and daemon
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),

    /// Start, stop or restart the query daemon
    Serve(commands::ServeArgs),
}
