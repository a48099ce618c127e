//! The update record entity.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use super::status::{PersistentStatus, UpdateStatus};

/// Mutable state of one downloadable update artifact.
///
/// Records are owned by the controller's registry. Everything handed out to
/// callers is a snapshot clone; identity is `download_id` alone.
///
/// # Example
///
/// ```
/// use otaflow::update::{UpdateRecord, UpdateStatus};
///
/// let update = UpdateRecord::new("a1b2", "ota-20240101.zip", "https://example.com/ota.zip")
///     .with_version("4.0")
///     .with_timestamp(1_704_067_200)
///     .with_file_size(1024);
///
/// assert_eq!(update.status, UpdateStatus::Unknown);
/// assert_eq!(update.file_size, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    /// Catalog-assigned unique key.
    pub download_id: String,
    /// File name of the artifact.
    pub name: String,
    /// Version string of the build.
    pub version: String,
    /// Release channel.
    pub release_type: String,
    /// Build time in seconds since the epoch.
    pub timestamp: i64,
    /// Where the artifact is fetched from.
    pub download_url: String,
    /// Expected size in bytes, 0 when unknown.
    pub file_size: u64,
    /// Expected SHA-256 of the artifact (lowercase hex), if the catalog has one.
    pub checksum: Option<String>,
    /// Local path, set once a download starts.
    pub local_file: Option<PathBuf>,
    /// Ephemeral status.
    pub status: UpdateStatus,
    /// Durable status.
    pub persistent_status: PersistentStatus,
    /// Download progress, 0-100.
    pub progress: u8,
    /// Installation progress, 0-100.
    pub install_progress: u8,
    /// Estimated seconds until the download completes.
    pub eta: u64,
    /// Download speed in bytes per second.
    pub speed: u64,
    /// Whether the current catalog still lists this update.
    pub available_online: bool,
    /// Streaming install is in its finalizing sub-phase.
    pub finalizing: bool,
}

impl UpdateRecord {
    /// Create a record with the required catalog fields.
    pub fn new(
        download_id: impl Into<String>,
        name: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            download_id: download_id.into(),
            name: name.into(),
            version: String::new(),
            release_type: String::new(),
            timestamp: 0,
            download_url: download_url.into(),
            file_size: 0,
            checksum: None,
            local_file: None,
            status: UpdateStatus::Unknown,
            persistent_status: PersistentStatus::Unknown,
            progress: 0,
            install_progress: 0,
            eta: 0,
            speed: 0,
            available_online: false,
            finalizing: false,
        }
    }

    /// Set the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the release channel.
    pub fn with_release_type(mut self, release_type: impl Into<String>) -> Self {
        self.release_type = release_type.into();
        self
    }

    /// Set the build timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the expected size.
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    /// Set the expected SHA-256 checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Set the local artifact path.
    pub fn with_local_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_file = Some(path.into());
        self
    }

    /// Set the durable status.
    pub fn with_persistent_status(mut self, status: PersistentStatus) -> Self {
        self.persistent_status = status;
        self
    }

    /// Length of the local artifact, if it exists.
    pub fn local_file_len(&self) -> Option<u64> {
        self.local_file
            .as_ref()
            .and_then(|path| path.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    /// Whether the local artifact exists.
    pub fn local_file_exists(&self) -> bool {
        self.local_file_len().is_some()
    }
}

impl PartialEq for UpdateRecord {
    fn eq(&self, other: &Self) -> bool {
        self.download_id == other.download_id
    }
}

impl Eq for UpdateRecord {}

impl Hash for UpdateRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.download_id.hash(state);
    }
}
