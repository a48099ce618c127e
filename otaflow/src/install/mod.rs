//! Installation strategies.
//!
//! Two installers share the [`Installer`] capability:
//!
//! - [`LegacyInstaller`] hands the whole package to a trusted
//!   [`PackageApplier`], optionally after a cancellable staging copy.
//! - [`StreamingInstaller`] drives an [`UpdateEngine`] that streams the
//!   package payload onto the inactive partition and survives restarts
//!   through [`InstallRecovery`](crate::store::InstallRecovery).
//!
//! The strategy is chosen once per install by looking at the package:
//! archives carrying both `payload.bin` and `payload_properties.txt` are
//! streaming packages.

mod engine;
mod error;
mod legacy;
mod staging;
mod streaming;

use std::fmt;
use std::path::Path;

pub use engine::{
    EngineCallback, EngineError, EngineErrorCode, EngineStatus, PackageApplier, UpdateEngine,
};
pub use error::{InstallError, StagingError};
pub use legacy::LegacyInstaller;
pub use streaming::StreamingInstaller;

use crate::archive::{self, ArchiveError};
use crate::config::DeviceProfile;
use crate::controller::Registry;
use crate::store::Preferences;

/// Which installer handles a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerKind {
    /// Whole-package install through the apply primitive.
    Legacy,
    /// Payload streaming through the update engine.
    Streaming,
}

impl InstallerKind {
    /// Pick the installer for the package at `path`.
    pub fn for_package(path: &Path) -> Result<Self, ArchiveError> {
        if archive::is_streaming_package(path)? {
            Ok(Self::Streaming)
        } else {
            Ok(Self::Legacy)
        }
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Streaming => f.write_str("streaming"),
        }
    }
}

/// An installation strategy.
pub trait Installer: Send + Sync {
    fn kind(&self) -> InstallerKind;

    /// Start installing a verified update.
    fn install(&self, download_id: &str) -> Result<(), InstallError>;

    /// Cancel the installation in flight.
    fn cancel(&self) -> Result<(), InstallError>;

    /// Whether this installer has an installation in flight.
    fn is_installing(&self) -> bool;

    /// Whether this installer is working on `download_id`.
    fn is_installing_update(&self, download_id: &str) -> bool;
}

/// What installers need from the rest of the updater.
#[derive(Clone)]
pub(crate) struct InstallContext {
    pub registry: Registry,
    pub prefs: Preferences,
    pub device: DeviceProfile,
}
