pub mod cli;
pub mod client;
pub mod error;
pub mod models;
pub mod pipelines;
pub mod qa;
pub mod server;
pub mod services;
pub mod sources;
pub mod utils;

pub use cli::{Cli, Commands};
pub use models::{Config, OutputFormat};
pub use pipelines::QueryOutcome;
pub use qa::QaSystem;
