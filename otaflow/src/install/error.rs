//! Error types for installers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::engine::EngineError;
use crate::archive::ArchiveError;
use crate::store::StoreError;

/// Errors returned by installers.
///
/// Failures after an install was accepted are reported through the record's
/// status instead.
#[derive(Debug, Error)]
pub enum InstallError {
    /// Another installation is in flight or waiting for a reboot.
    #[error("an update is already being installed")]
    AlreadyInstalling,

    /// There is no installation to act on.
    #[error("no update is being installed")]
    NotInstalling,

    /// The installation is past the point where it can be cancelled.
    #[error("the installation can no longer be cancelled")]
    NotCancellable,

    /// The update engine connection is not established.
    #[error("not connected to the update engine")]
    NotBound,

    /// The id is not registered.
    #[error("unknown update: {0}")]
    UnknownUpdate(String),

    /// The artifact of the update is not on disk.
    #[error("artifact of update {download_id} is missing")]
    ArtifactMissing {
        download_id: String,
        path: Option<PathBuf>,
    },

    /// The package lacks the entries the installer needs.
    #[error("invalid update package: {0}")]
    Protocol(#[from] ArchiveError),

    /// Connecting to the update engine failed.
    #[error("could not bind to the update engine: {0}")]
    BindFailed(EngineError),

    /// The update engine rejected a request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The package apply primitive failed.
    #[error("failed to apply {}: {source}", path.display())]
    Apply { path: PathBuf, source: io::Error },

    /// Installer bookkeeping could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of the staging copy.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The copy was cancelled.
    #[error("staging copy cancelled")]
    Cancelled,

    /// Reading the artifact or writing the copy failed.
    #[error("staging copy to {} failed: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}
