//! Collaborator interfaces for applying packages.
//!
//! [`PackageApplier`] is the trusted whole-package primitive used by the
//! legacy installer. [`UpdateEngine`] is the long-lived service that streams a
//! payload onto the inactive partition for the streaming installer.

use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Trusted primitive that installs a whole package.
pub trait PackageApplier: Send + Sync {
    /// Whether the package must be copied before the primitive can read it,
    /// e.g. because it lives on encrypted storage.
    fn requires_staging(&self, package: &Path) -> bool;

    /// Hand the package over for installation.
    fn apply(&self, package: &Path) -> io::Result<()>;
}

/// Error reported by the update engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("update engine error: {0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Status reported by the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    CheckingForUpdate,
    UpdateAvailable,
    Downloading,
    Verifying,
    Finalizing,
    UpdatedNeedReboot,
    ReportingErrorEvent,
    AttemptingRollback,
    Disabled,
}

/// Result code of a payload application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineErrorCode(pub i32);

impl EngineErrorCode {
    pub const SUCCESS: Self = Self(0);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

/// Notifications from the update engine. Called from the engine's thread.
pub trait EngineCallback: Send + Sync {
    /// Progress of the engine; `percent` is in `0.0..=1.0`.
    fn on_status_update(&self, status: EngineStatus, percent: f32);

    fn on_payload_application_complete(&self, code: EngineErrorCode);
}

/// Connection to the payload-streaming update service.
pub trait UpdateEngine: Send + Sync {
    /// Connect and register `callback`. The engine reports its current status
    /// once connected.
    fn bind(&self, callback: Arc<dyn EngineCallback>) -> Result<(), EngineError>;

    /// Start applying the payload at `offset` within the package at `url`.
    fn apply_payload(
        &self,
        url: &str,
        offset: u64,
        size: u64,
        headers: &[String],
    ) -> Result<(), EngineError>;

    fn cancel(&self) -> Result<(), EngineError>;

    fn set_performance_mode(&self, enable: bool);
}
