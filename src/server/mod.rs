//! Long-lived query daemon holding one warmed [`QaSystem`].

pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::models::Config;
use crate::qa::QaSystem;
use crate::server::protocol::{
    AnswerResponse, Request, Response, StatusResponse, read_frame, write_message,
};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// How long open connections may keep the daemon alive after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct DaemonServer {
    qa: Arc<QaSystem>,
    socket_path: PathBuf,
    pid_path: PathBuf,
    idle_timeout: Option<Duration>,
    started_at: DateTime<Utc>,
    last_request: RwLock<Instant>,
    requests_served: AtomicU64,
    in_flight: AtomicUsize,
    shutdown: Notify,
}

impl DaemonServer {
    pub fn new(config: Config) -> Self {
        let socket_path = config.socket_path();
        let pid_path = config.pid_path();
        let idle_timeout = match config.daemon.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::with_system(Arc::new(QaSystem::new(config)), socket_path, pid_path, idle_timeout)
    }

    pub fn with_system(
        qa: Arc<QaSystem>,
        socket_path: PathBuf,
        pid_path: PathBuf,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            qa,
            socket_path,
            pid_path,
            idle_timeout,
            started_at: Utc::now(),
            last_request: RwLock::new(Instant::now()),
            requests_served: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            shutdown: Notify::new(),
        }
    }

    /// Serve until `shutdown`, a signal, or the idle timeout.
    pub async fn run(self: Arc<Self>) -> Result<(), std::io::Error> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::write(&self.pid_path, std::process::id().to_string())?;

        info!(socket = %self.socket_path.display(), idle_timeout = ?self.idle_timeout, "daemon listening");

        let check_interval = self
            .idle_timeout
            .map_or(IDLE_CHECK_INTERVAL, |t| (t / 2).min(IDLE_CHECK_INTERVAL));
        let signal = shutdown_signal();
        tokio::pin!(signal);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            self.touch().await;
                            let server = Arc::clone(&self);
                            connections.spawn(async move { server.handle_connection(stream).await });
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown requested");
                    break;
                }
                _ = &mut signal => {
                    info!("received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(check_interval) => {
                    if self.is_idle().await {
                        info!("idle timeout reached, shutting down");
                        break;
                    }
                }
            }
        }

        drop(listener);
        self.drain(connections).await;
        self.cleanup();
        Ok(())
    }

    async fn touch(&self) {
        *self.last_request.write().await = Instant::now();
    }

    async fn is_idle(&self) -> bool {
        let Some(idle_timeout) = self.idle_timeout else {
            return false;
        };
        self.in_flight.load(Ordering::Acquire) == 0
            && self.last_request.read().await.elapsed() > idle_timeout
    }

    /// Let open connections finish, then abort whatever is left.
    async fn drain(&self, mut connections: JoinSet<()>) {
        if connections.is_empty() {
            return;
        }
        debug!(open = connections.len(), "waiting for connections");
        let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(open = connections.len(), "aborting connections still open");
            connections.shutdown().await;
        }
    }

    /// Build the query pipeline now instead of on the first question.
    pub async fn warm_up(&self) {
        match self.qa.warm_up().await {
            Ok(()) => info!("query pipeline ready"),
            Err(e) => warn!(error = %e, "query pipeline not ready; will retry on first question"),
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) {
        loop {
            let frame = match read_frame(&mut stream).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "dropping connection");
                    break;
                }
            };

            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let response = match serde_json::from_slice::<Request>(&frame) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => Response::error(format!("invalid request: {}", e)),
            };
            self.requests_served.fetch_add(1, Ordering::Relaxed);
            self.touch().await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);

            if write_message(&mut stream, &response).await.is_err() {
                break;
            }

            if matches!(response, Response::ShutdownAck) {
                self.shutdown.notify_one();
                break;
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Shutdown => Response::ShutdownAck,

            Request::Status => {
                let idle_secs = self.last_request.read().await.elapsed().as_secs();
                Response::Status(StatusResponse {
                    running: true,
                    pid: std::process::id(),
                    started_at: self.started_at,
                    idle_secs,
                    requests_served: self.requests_served.load(Ordering::Relaxed),
                    system: self.qa.status().await,
                })
            }

            Request::Ask(req) => {
                let outcome = self.qa.answer(&req.question).await;
                Response::Answer(AnswerResponse {
                    answered: outcome.is_answered(),
                    answer: outcome.into_message(),
                })
            }

            Request::Retrieve(req) => {
                match self.qa.retrieve_documents(&req.question, req.top_k).await {
                    Ok(results) => Response::Documents(results),
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::Ingest(req) => {
                match self
                    .qa
                    .ingest_documents(&req.path, req.file_types.as_deref())
                    .await
                {
                    Ok(report) => Response::Ingested(report),
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::Clear => match self.qa.clear_namespace().await {
                Ok(removed) => Response::Cleared { removed },
                Err(e) => Response::error(e.to_string()),
            },

            Request::Refresh => Response::Refreshed {
                dropped: self.qa.refresh().await,
            },
        }
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
        info!("daemon stopped");
    }
}

pub async fn run_daemon(config: Config, warm_up: bool) -> Result<(), std::io::Error> {
    let server = Arc::new(DaemonServer::new(config));
    if warm_up {
        server.warm_up().await;
    }
    server.run().await
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
