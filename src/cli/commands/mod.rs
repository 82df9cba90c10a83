mod ask;
mod clear;
mod config;
mod ingest;
mod retrieve;
mod serve;
mod status;

pub use ask::AskArgs;
pub use clear::ClearArgs;
pub use config::ConfigCommand;
pub use ingest::IngestArgs;
pub use retrieve::RetrieveArgs;
pub use serve::ServeArgs;

pub use ask::handle_ask;
pub use clear::handle_clear;
pub use config::handle_config;
pub use ingest::handle_ingest;
pub use retrieve::handle_retrieve;
pub use serve::handle_serve;
pub use status::handle_status;

use tracing::debug;

use crate::client::DaemonClient;
use crate::models::Config;

/// A client for the running daemon, unless disabled or not running.
fn running_daemon(config: &Config, no_daemon: bool) -> Option<DaemonClient> {
    if no_daemon {
        return None;
    }
    let client = DaemonClient::new(config);
    if client.is_running() {
        debug!(socket = %client.socket_path().display(), "routing through daemon");
        Some(client)
    } else {
        None
    }
}
