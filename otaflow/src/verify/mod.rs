//! Artifact verification.
//!
//! The controller runs a [`Verifier`] on a worker thread once a download
//! completes. Verification can be switched off through the `verify_mode`
//! preference, in which case the verifier is never called.

mod checksum;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::update::UpdateRecord;

pub use checksum::{calculate_file_checksum, Sha256Verifier};

/// Reasons an artifact is rejected.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The artifact could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// The artifact's digest does not match the catalog.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// The catalog did not provide a checksum for this update.
    #[error("no checksum available for update {0}")]
    MissingChecksum(String),

    /// A verifier rejected the artifact for another reason.
    #[error("artifact rejected: {0}")]
    Rejected(String),
}

/// Validates a downloaded artifact.
pub trait Verifier: Send + Sync {
    fn verify(&self, path: &Path, record: &UpdateRecord) -> Result<(), VerificationError>;
}
