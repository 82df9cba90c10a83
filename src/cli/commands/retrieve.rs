use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use super::running_daemon;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::qa::QaSystem;

#[derive(Debug, Args)]
pub struct RetrieveArgs {
    #[arg(required = true, help = "Question to retrieve documents for")]
    pub question: String,

    #[arg(long, short = 'k', help = "Maximum number of documents to return")]
    pub top_k: Option<usize>,

    #[arg(long, help = "Retrieve in this process even if the daemon is running")]
    pub no_daemon: bool,
}

pub async fn handle_retrieve(args: RetrieveArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    if args.top_k == Some(0) {
        anyhow::bail!("top-k must be at least 1");
    }

    let config = Config::load()?;
    let formatter = get_formatter(format);

    if verbose {
        eprintln!("Question: \"{}\"", args.question);
        eprintln!(
            "  Top K: {}",
            args.top_k.unwrap_or(config.retrieval.debug_top_k)
        );
    }

    if let Some(client) = running_daemon(&config, args.no_daemon) {
        match client.retrieve(&args.question, args.top_k).await {
            Ok(results) => {
                print!("{}", formatter.format_documents(&results));
                return Ok(());
            }
            Err(e) => warn!(error = %e, "daemon unavailable, retrieving locally"),
        }
    }

    let qa = QaSystem::new(config);
    let results = qa
        .retrieve_documents(&args.question, args.top_k)
        .await
        .context("retrieval failed")?;

    if verbose {
        eprintln!("  Duration: {}ms", results.duration_ms);
    }
    print!("{}", formatter.format_documents(&results));
    Ok(())
}
