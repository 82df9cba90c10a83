use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::get_formatter;
use crate::client::{DaemonClient, stop_daemon};
use crate::error::DaemonError;
use crate::models::{Config, OutputFormat};
use crate::server::run_daemon;

const STOP_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(subcommand)]
    pub command: Option<ServeCommand>,

    #[arg(long, help = "Serve from this process instead of detaching")]
    pub foreground: bool,

    #[arg(
        long,
        value_name = "SECS",
        help = "Exit after this many seconds without a request (0 = never)"
    )]
    pub idle_timeout: Option<u64>,

    #[arg(long, value_name = "PATH", help = "Listen on this socket instead of the configured one")]
    pub socket: Option<PathBuf>,

    #[arg(long, help = "Build the query pipeline on the first question, not at startup")]
    pub lazy: bool,
}

#[derive(Debug, Subcommand)]
pub enum ServeCommand {
    /// Stop the running daemon
    Stop,
    /// Stop the daemon, wait for its socket to go away, then start it again
    Restart,
}

pub async fn handle_serve(args: ServeArgs, format: OutputFormat) -> Result<()> {
    let mut config = Config::load()?;
    apply_overrides(&mut config, &args);

    if args.foreground {
        eprintln!(
            "ragqa daemon on {} (idle timeout: {})",
            config.socket_path().display(),
            describe_idle(config.daemon.idle_timeout_secs)
        );
        return run_daemon(config, !args.lazy)
            .await
            .context("daemon exited with an error");
    }

    let output = match args.command {
        Some(ServeCommand::Stop) => handle_stop(&config).await?,
        Some(ServeCommand::Restart) => {
            handle_stop(&config).await?;
            wait_until_stopped(&DaemonClient::new(&config)).await?;
            handle_start(&config, &args).await?
        }
        None => handle_start(&config, &args).await?,
    };

    print!("{}", get_formatter(format).format_message(&output));
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(secs) = args.idle_timeout {
        config.daemon.idle_timeout_secs = secs;
    }
    if let Some(socket) = &args.socket {
        config.daemon.socket_path = Some(socket.clone());
    }
}

/// Flags forwarded to the detached `serve --foreground` process.
fn daemon_args(config: &Config, args: &ServeArgs) -> Vec<String> {
    let mut forwarded = vec![
        "--idle-timeout".to_string(),
        config.daemon.idle_timeout_secs.to_string(),
        "--socket".to_string(),
        config.socket_path().to_string_lossy().into_owned(),
    ];
    if args.lazy {
        forwarded.push("--lazy".to_string());
    }
    forwarded
}

fn describe_idle(secs: u64) -> String {
    match secs {
        0 => "never".to_string(),
        secs => format!("{}s", secs),
    }
}

async fn handle_start(config: &Config, args: &ServeArgs) -> Result<String> {
    let client = DaemonClient::new(config);
    let socket = config.socket_path();

    if client.is_running() {
        return Ok(format!("ragqa daemon already listening on {}", socket.display()));
    }

    client
        .spawn(&daemon_args(config, args))
        .await
        .context("daemon did not come up")?;

    let pipeline = match client.status().await {
        Ok(status) if status.system.pipeline_ready => "query pipeline ready",
        Ok(_) => "query pipeline will be built on the first question",
        Err(_) => "status unavailable",
    };
    Ok(format!(
        "ragqa daemon listening on {} (idle timeout: {}, {})",
        socket.display(),
        describe_idle(config.daemon.idle_timeout_secs),
        pipeline
    ))
}

async fn handle_stop(config: &Config) -> Result<String> {
    match stop_daemon(config).await {
        Ok(()) => Ok("ragqa daemon stopped".to_string()),
        Err(DaemonError::NotRunning) => Ok(format!(
            "No ragqa daemon on {}",
            config.socket_path().display()
        )),
        Err(e) => Err(e).context("failed to stop daemon"),
    }
}

async fn wait_until_stopped(client: &DaemonClient) -> Result<()> {
    let poll = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + STOP_WAIT;
    while client.is_running() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "daemon on {} still running after {}s",
                client.socket_path().display(),
                STOP_WAIT.as_secs()
            );
        }
        tokio::time::sleep(poll).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let mut full = vec!["ragqa", "serve"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Serve(args) => args,
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_overrides_reach_the_detached_daemon() {
        let args = serve_args(&["--idle-timeout", "0", "--socket", "/tmp/rq.sock", "--lazy"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.daemon.idle_timeout_secs, 0);
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/rq.sock"));
        assert_eq!(
            daemon_args(&config, &args),
            ["--idle-timeout", "0", "--socket", "/tmp/rq.sock", "--lazy"]
        );
    }

    #[test]
    fn test_configured_values_are_forwarded_without_flags() {
        let args = serve_args(&["restart"]);
        assert!(matches!(args.command, Some(ServeCommand::Restart)));

        let mut config = Config::default();
        config.daemon.socket_path = Some(PathBuf::from("/run/ragqa/d.sock"));
        apply_overrides(&mut config, &args);

        let forwarded = daemon_args(&config, &args);
        assert_eq!(forwarded[1], "1800");
        assert_eq!(forwarded[3], "/run/ragqa/d.sock");
        assert!(!forwarded.iter().any(|a| a == "--lazy"));
        assert_eq!(describe_idle(0), "never");
    }

    #[tokio::test]
    async fn test_stop_without_daemon_names_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.socket_path = Some(dir.path().join("none.sock"));

        let message = handle_stop(&config).await.unwrap();
        assert!(message.contains("none.sock"));
        wait_until_stopped(&DaemonClient::new(&config)).await.unwrap();
    }
}
