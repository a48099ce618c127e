//! Configuration for the updater.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{UpdaterError, UpdaterResult};
use crate::events::DEFAULT_EVENT_CAPACITY;

/// Facts about the device being updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceProfile {
    /// Build time of the running system, in seconds.
    ///
    /// Updates with a timestamp at or before this are considered installed.
    pub build_timestamp: i64,

    /// Whether the device applies updates to an inactive partition.
    pub supports_dual_partition: bool,
}

impl DeviceProfile {
    pub fn new(build_timestamp: i64) -> Self {
        Self {
            build_timestamp,
            supports_dual_partition: false,
        }
    }

    pub fn with_dual_partition(mut self, supported: bool) -> Self {
        self.supports_dual_partition = supported;
        self
    }
}

/// Configuration for the updater.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Directory where artifacts are downloaded.
    pub download_dir: PathBuf,

    /// Directory for settings and update metadata.
    pub state_dir: PathBuf,

    /// The running device.
    pub device: DeviceProfile,

    /// Maximum silence between download progress events for an unchanged
    /// percentage.
    pub progress_report_interval: Duration,

    /// Minimum spacing of install progress events while staging a copy.
    pub install_progress_interval: Duration,

    /// Undelivered events buffered per subscriber.
    pub event_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("otaflow");
        Self {
            download_dir: base.join("downloads"),
            state_dir: base,
            device: DeviceProfile::default(),
            progress_report_interval: Duration::from_millis(1000),
            install_progress_interval: Duration::from_millis(500),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl UpdaterConfig {
    /// Create a configuration for `device` with default directories.
    pub fn new(device: DeviceProfile) -> Self {
        Self {
            device,
            ..Default::default()
        }
    }

    /// Set the download directory.
    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    /// Set the state directory.
    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    /// Set the download progress report interval.
    pub fn with_progress_report_interval(mut self, interval: Duration) -> Self {
        self.progress_report_interval = interval;
        self
    }

    /// Set the install progress interval.
    pub fn with_install_progress_interval(mut self, interval: Duration) -> Self {
        self.install_progress_interval = interval;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Path of the settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("settings.ini")
    }

    /// Path of the update metadata file.
    pub fn updates_path(&self) -> PathBuf {
        self.state_dir.join("updates.json")
    }

    /// Check the configuration for values the updater cannot work with.
    pub fn validate(&self) -> UpdaterResult<()> {
        if self.event_capacity == 0 {
            return Err(UpdaterError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(UpdaterError::InvalidConfig(
                "download_dir must not be empty".to_string(),
            ));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(UpdaterError::InvalidConfig(
                "state_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
