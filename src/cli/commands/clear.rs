use anyhow::{Context, Result};
use clap::Args;

use super::running_daemon;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::qa::QaSystem;

#[derive(Debug, Args)]
pub struct ClearArgs {
    #[arg(long, help = "Confirm deleting every vector in the configured namespace")]
    pub yes: bool,

    #[arg(long, help = "Clear from this process even if the daemon is running")]
    pub no_daemon: bool,
}

pub async fn handle_clear(args: ClearArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let index = config.vector_store.index_name.clone();
    let namespace = config.vector_store.namespace.clone();

    if !args.yes {
        anyhow::bail!(
            "this deletes every vector in namespace '{}' of index '{}'; rerun with --yes",
            namespace,
            index
        );
    }

    if verbose {
        eprintln!("Clearing namespace '{}' of index '{}'", namespace, index);
    }

    let removed = match running_daemon(&config, args.no_daemon) {
        Some(client) => client.clear().await.context("daemon clear failed")?,
        None => QaSystem::new(config)
            .clear_namespace()
            .await
            .context("failed to clear namespace")?,
    };

    print!(
        "{}",
        formatter.format_message(&format!(
            "Removed {} vectors from namespace '{}'",
            removed, namespace
        ))
    );
    Ok(())
}
