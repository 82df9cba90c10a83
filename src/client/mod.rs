//! Client side of the daemon socket.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::DaemonError;
use crate::models::{Config, IngestReport, RetrievalResults};
use crate::server::protocol::{
    AnswerResponse, AskRequest, IngestRequest, Request, Response, RetrieveRequest,
    StatusResponse, read_frame, write_message,
};

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.socket_path.exists()
            && std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Start `ragqa serve --foreground <daemon_args>` detached and wait until it answers.
    pub async fn spawn(&self, daemon_args: &[String]) -> Result<(), DaemonError> {
        let exe = std::env::current_exe().map_err(|e| DaemonError::SpawnError(e.to_string()))?;

        Command::new(&exe)
            .args(["serve", "--foreground"])
            .args(daemon_args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| DaemonError::SpawnError(e.to_string()))?;

        self.wait_for_ready(Duration::from_secs(60)).await
    }

    pub async fn wait_for_ready(&self, max_wait: Duration) -> Result<(), DaemonError> {
        let check_interval = Duration::from_millis(100);
        let start = std::time::Instant::now();

        while start.elapsed() < max_wait {
            if self.is_running() && self.ping().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(check_interval).await;
        }

        Err(DaemonError::Timeout)
    }

    async fn send_request(&self, request: Request) -> Result<Response, DaemonError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| DaemonError::ConnectionFailed(e.to_string()))?;

        write_message(&mut stream, &request)
            .await
            .map_err(|e| DaemonError::SocketError(e.to_string()))?;

        let frame = read_frame(&mut stream)
            .await
            .map_err(|e| DaemonError::SocketError(e.to_string()))?
            .ok_or_else(|| DaemonError::ProtocolError("connection closed".to_string()))?;

        let response: Response = serde_json::from_slice(&frame)
            .map_err(|e| DaemonError::ProtocolError(e.to_string()))?;
        match response {
            Response::Error(e) => Err(DaemonError::Remote(e.message)),
            response => Ok(response),
        }
    }

    pub async fn ping(&self) -> Result<(), DaemonError> {
        match self.send_request(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse, DaemonError> {
        match self.send_request(Request::Status).await? {
            Response::Status(s) => Ok(s),
            other => Err(unexpected(other)),
        }
    }

    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        match self.send_request(Request::Shutdown).await? {
            Response::ShutdownAck => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ask(&self, question: &str) -> Result<AnswerResponse, DaemonError> {
        let request = Request::Ask(AskRequest {
            question: question.to_string(),
        });
        match self.send_request(request).await? {
            Response::Answer(answer) => Ok(answer),
            other => Err(unexpected(other)),
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<RetrievalResults, DaemonError> {
        let request = Request::Retrieve(RetrieveRequest {
            question: question.to_string(),
            top_k,
        });
        match self.send_request(request).await? {
            Response::Documents(results) => Ok(results),
            other => Err(unexpected(other)),
        }
    }

    /// `path` is made absolute before it is sent.
    pub async fn ingest(
        &self,
        path: impl AsRef<Path>,
        file_types: Option<Vec<String>>,
    ) -> Result<IngestReport, DaemonError> {
        let path = std::path::absolute(path.as_ref())?;
        let request = Request::Ingest(IngestRequest {
            path: path.to_string_lossy().into_owned(),
            file_types,
        });
        match self.send_request(request).await? {
            Response::Ingested(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear(&self) -> Result<u64, DaemonError> {
        match self.send_request(Request::Clear).await? {
            Response::Cleared { removed } => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn refresh(&self) -> Result<bool, DaemonError> {
        match self.send_request(Request::Refresh).await? {
            Response::Refreshed { dropped } => Ok(dropped),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> DaemonError {
    DaemonError::ProtocolError(format!("unexpected response: {:?}", response))
}

/// Ask the daemon to exit; fall back to SIGTERM via the pid file.
pub async fn stop_daemon(config: &Config) -> Result<(), DaemonError> {
    let client = DaemonClient::new(config);
    if client.is_running() {
        match client.shutdown().await {
            Ok(()) => return Ok(()),
            Err(e) => debug!(error = %e, "shutdown request failed, signalling"),
        }
    }

    let pid_path = config.pid_path();
    if !pid_path.exists() {
        return Err(DaemonError::NotRunning);
    }

    let pid_str = std::fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str
        .trim()
        .parse()
        .map_err(|_| DaemonError::ProtocolError("invalid pid file".to_string()))?;

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|e| DaemonError::SocketError(e.to_string()))?;
    }

    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(config.socket_path());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_without_daemon_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.socket_path = Some(dir.path().join("absent.sock"));

        assert!(!DaemonClient::new(&config).is_running());
        assert!(matches!(
            stop_daemon(&config).await,
            Err(DaemonError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_request_without_daemon_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.socket_path = Some(dir.path().join("absent.sock"));

        let err = DaemonClient::new(&config).ping().await.unwrap_err();
        assert!(matches!(err, DaemonError::ConnectionFailed(_)));
    }
}
