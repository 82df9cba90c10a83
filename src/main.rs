use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ragqa::cli::commands::{
    handle_ask, handle_clear, handle_config, handle_ingest, handle_retrieve, handle_serve,
    handle_status,
};
use ragqa::cli::output::get_formatter;
use ragqa::cli::{Cli, Commands};
use ragqa::models::OutputFormat;
use ragqa::server::shutdown_signal;

const ORT_LIB: &str = if cfg!(target_os = "macos") {
    "libonnxruntime.dylib"
} else {
    "libonnxruntime.so"
};

fn ort_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/lib/ragqa").join(ORT_LIB));
    }
    let system_dirs: &[&str] = if cfg!(target_os = "macos") {
        &["/opt/homebrew/opt/onnxruntime/lib", "/usr/local/opt/onnxruntime/lib"]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/lib",
            "/usr/local/lib",
            "/usr/lib/x86_64-linux-gnu",
            "/usr/lib/aarch64-linux-gnu",
        ]
    } else {
        &[]
    };
    candidates.extend(system_dirs.iter().map(|dir| Path::new(dir).join(ORT_LIB)));
    candidates
}

/// Point `ORT_DYLIB_PATH` at an installed ONNX Runtime unless it already
/// names an existing file. Runs before the async runtime starts any threads.
fn detect_ort_library() {
    if std::env::var_os("ORT_DYLIB_PATH").is_some_and(|p| Path::new(&p).exists()) {
        return;
    }

    if let Some(path) = ort_candidates().into_iter().find(|p| p.exists()) {
        // SAFETY: single-threaded at this point.
        unsafe {
            std::env::set_var("ORT_DYLIB_PATH", path);
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(verbose: bool) {
    let default = if verbose { "ragqa=debug" } else { "ragqa=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    detect_ort_library();
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let format = cli.format.unwrap_or_default();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(run(cli, format)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", get_formatter(format).format_error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, format: OutputFormat) -> Result<()> {
    let verbose = cli.verbose;

    let command = match cli.command {
        // the daemon handles signals itself and must clean up its socket
        Commands::Serve(args) => return handle_serve(args, format).await,
        command => command,
    };

    tokio::select! {
        result = run_command(command, format, verbose) => {
            result?;
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cleaning up...");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Ingest(args) => handle_ingest(args, format, verbose).await,
        Commands::Ask(args) => handle_ask(args, format, verbose).await,
        Commands::Retrieve(args) => handle_retrieve(args, format, verbose).await,
        Commands::Clear(args) => handle_clear(args, format, verbose).await,
        Commands::Status => handle_status(format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, format, verbose).await,
        Commands::Serve(args) => handle_serve(args, format).await,
    }
}
