//! Status enums for update records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// In-memory status of an update.
///
/// Never persisted: after a restart it is rebuilt from [`PersistentStatus`]
/// and the state of the artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateStatus {
    /// Nothing is known about a local artifact.
    #[default]
    Unknown,
    /// A transport was attached but no response arrived yet.
    Starting,
    /// Response headers arrived, bytes are flowing.
    Downloading,
    /// Paused by the user.
    Paused,
    /// The transport failed; the user may resume.
    PausedError,
    /// The artifact was deleted by the user.
    Deleted,
    /// Download finished, verification running.
    Verifying,
    /// Artifact verified and installable.
    Verified,
    /// Verification rejected the artifact; it has been deleted.
    VerificationFailed,
    /// An installer is working on the artifact.
    Installing,
    /// Installed (or already running this build).
    Installed,
    /// The installer reported a failure.
    InstallationFailed,
    /// The user cancelled the installation.
    InstallationCancelled,
}

impl UpdateStatus {
    /// Get a human-readable name for the status.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::PausedError => "paused (error)",
            Self::Deleted => "deleted",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::VerificationFailed => "verification failed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::InstallationFailed => "installation failed",
            Self::InstallationCancelled => "installation cancelled",
        }
    }

    /// Whether a transport is attached in this status.
    pub fn is_transferring(&self) -> bool {
        matches!(self, Self::Starting | Self::Downloading)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse status that survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistentStatus {
    /// Catalog metadata only.
    #[default]
    Unknown,
    /// A download was started and may have left a partial file.
    Incomplete,
    /// The artifact on disk passed verification.
    Verified,
}
