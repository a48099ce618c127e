//! Error types for durable storage.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing durable state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read a state file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a state file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// A state file exists but could not be parsed.
    #[error("failed to parse {}: {reason}", path.display())]
    ParseFailed { path: PathBuf, reason: String },
}
