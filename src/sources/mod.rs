//! Turning files on disk into documents.

mod loader;

pub use loader::{DocumentLoader, LoadOutcome};
