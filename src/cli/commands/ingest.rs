use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::running_daemon;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::qa::QaSystem;

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(required = true, help = "File or directory to ingest")]
    pub path: PathBuf,

    #[arg(
        long,
        short = 't',
        value_delimiter = ',',
        help = "File extensions to load (e.g., '.txt,.pdf')"
    )]
    pub file_types: Option<Vec<String>>,

    #[arg(long, help = "Ingest in this process even if the daemon is running")]
    pub no_daemon: bool,
}

pub async fn handle_ingest(args: IngestArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    if verbose {
        eprintln!("Ingesting: {}", args.path.display());
        if let Some(ref types) = args.file_types {
            eprintln!("  File types: {}", types.join(", "));
        }
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(format!("Ingesting {}", args.path.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = match running_daemon(&config, args.no_daemon) {
        Some(client) => client
            .ingest(&args.path, args.file_types.clone())
            .await
            .context("daemon ingestion failed"),
        None => {
            let qa = QaSystem::new(config);
            qa.ingest_documents(&args.path, args.file_types.as_deref())
                .await
                .with_context(|| format!("failed to ingest {}", args.path.display()))
        }
    };
    pb.finish_and_clear();

    let report = result?;
    print!("{}", formatter.format_ingest(&report));
    Ok(())
}
