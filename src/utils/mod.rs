//! Utility modules.

pub mod file;
pub mod retry;

pub use file::{file_extension, file_name, normalize_extensions, read_file_content};
pub use retry::{RetryConfig, Retryable, with_retry, with_timeout};
