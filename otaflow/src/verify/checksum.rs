//! SHA-256 checksum verification of downloaded artifacts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{VerificationError, Verifier};
use crate::update::UpdateRecord;

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate SHA-256 checksum of a file.
///
/// Returns the lowercase hexadecimal SHA-256 hash of the file contents.
pub fn calculate_file_checksum(path: &Path) -> Result<String, VerificationError> {
    let mut file = File::open(path).map_err(|e| VerificationError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| VerificationError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verifies artifacts against the SHA-256 digest in [`UpdateRecord::checksum`].
#[derive(Debug, Clone, Default)]
pub struct Sha256Verifier {
    allow_missing_checksum: bool,
}

impl Sha256Verifier {
    /// Create a verifier that rejects updates without a checksum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept updates whose catalog entry has no checksum.
    pub fn allow_missing_checksum(mut self, allow: bool) -> Self {
        self.allow_missing_checksum = allow;
        self
    }
}

impl Verifier for Sha256Verifier {
    fn verify(&self, path: &Path, record: &UpdateRecord) -> Result<(), VerificationError> {
        let Some(expected) = record.checksum.as_deref() else {
            if self.allow_missing_checksum {
                warn!(download_id = %record.download_id, "No checksum, accepting artifact");
                return Ok(());
            }
            return Err(VerificationError::MissingChecksum(record.download_id.clone()));
        };

        let actual = calculate_file_checksum(path)?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(VerificationError::ChecksumMismatch {
                filename: path
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string(),
                expected: expected.to_string(),
                actual,
            });
        }

        debug!(download_id = %record.download_id, "Checksum verified");
        Ok(())
    }
}
