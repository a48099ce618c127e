//! Top-level error type for controller and application operations.
//!
//! Component errors ([`TransportError`](crate::download::TransportError),
//! [`VerificationError`](crate::verify::VerificationError),
//! [`InstallError`](crate::install::InstallError),
//! [`StoreError`](crate::store::StoreError)) are mostly absorbed into record
//! status by the component that owns the asynchronous phase. What reaches a
//! caller synchronously is an [`UpdaterError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::install::InstallError;
use crate::store::StoreError;

/// Result type for updater operations.
pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// Errors returned synchronously by the controller and the application context.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// No record with this id is registered.
    #[error("unknown update: {0}")]
    UnknownUpdate(String),

    /// The record exists but its artifact has not been verified.
    #[error("update {0} is not verified")]
    NotVerified(String),

    /// An installer refused or failed the request.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// Durable storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failed to create a working directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The global log subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}
