use anyhow::Result;

use crate::cli::output::{DaemonInfo, StatusInfo, get_formatter};
use crate::client::DaemonClient;
use crate::models::{Config, OutputFormat, VectorDriver, optional_credential};
use crate::qa::QaSystem;

pub async fn handle_status(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let client = DaemonClient::new(&config);
    let daemon_status = if client.is_running() {
        client.status().await.ok()
    } else {
        None
    };

    let status = match daemon_status {
        Some(remote) => StatusInfo {
            daemon: Some(DaemonInfo {
                pid: remote.pid,
                started_at: remote.started_at,
                idle_secs: remote.idle_secs,
                requests_served: remote.requests_served,
            }),
            system: remote.system,
        },
        None => StatusInfo {
            daemon: None,
            system: QaSystem::new(config.clone()).status().await,
        },
    };

    print!("{}", formatter.format_status(&status));

    let hints = status_hints(&config, &status);
    if !hints.is_empty() {
        eprintln!();
        for hint in hints {
            eprintln!("{}", hint);
        }
    }

    Ok(())
}

/// Follow-up advice for whatever the status shows as missing. Credentials
/// are checked under the variable names the config points at.
fn status_hints(config: &Config, status: &StatusInfo) -> Vec<String> {
    let mut hints = Vec::new();
    let system = &status.system;

    if status.daemon.is_none() {
        hints.push("Hint: query daemon not running. Start it with: ragqa serve".to_string());
    }

    if system.store_reachable != Some(true) {
        let store_key = &config.vector_store.api_key_env;
        match config.vector_store.driver {
            VectorDriver::Pinecone if optional_credential(store_key).is_none() => hints.push(
                format!("Warning: {} is not set. Add it to .env or the environment.", store_key),
            ),
            VectorDriver::Pinecone => hints.push(
                "Warning: Pinecone index not reachable. Check the key and network.".to_string(),
            ),
            VectorDriver::Qdrant => hints.push(format!(
                "Warning: Qdrant not reachable at {}.",
                config.vector_store.url
            )),
            VectorDriver::Memory => {}
        }
    }

    let generation_key = &config.generation.api_key_env;
    if optional_credential(generation_key).is_none() {
        hints.push(format!(
            "Warning: {} is not set; questions cannot be answered.",
            generation_key
        ));
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_status(config: &Config) -> StatusInfo {
        StatusInfo {
            daemon: None,
            system: QaSystem::new(config.clone()).status().await,
        }
    }

    #[tokio::test]
    async fn test_generation_key_checked_by_configured_name() {
        // SAFETY: variable is unique to this test
        unsafe { std::env::set_var("RAGQA_TEST_STATUS_GROQ_KEY", "gsk-test") };
        let mut config = Config::default();
        config.vector_store.driver = VectorDriver::Memory;
        config.generation.api_key_env = "RAGQA_TEST_STATUS_GROQ_KEY".to_string();

        let hints = status_hints(&config, &memory_status(&config).await);
        assert!(hints.iter().all(|h| !h.contains("questions cannot be answered")));
        assert!(hints.iter().any(|h| h.contains("daemon not running")));
    }

    #[tokio::test]
    async fn test_missing_configured_generation_key_is_named() {
        let mut config = Config::default();
        config.vector_store.driver = VectorDriver::Memory;
        config.generation.api_key_env = "RAGQA_TEST_STATUS_UNSET_KEY".to_string();

        let hints = status_hints(&config, &memory_status(&config).await);
        assert!(
            hints
                .iter()
                .any(|h| h.contains("RAGQA_TEST_STATUS_UNSET_KEY is not set"))
        );
    }
}
