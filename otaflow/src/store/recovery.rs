//! Crash-recovery state of the streaming installer.
//!
//! Two ids survive restarts: the install currently being applied by the
//! update engine, and the install that finished and waits for a reboot.

use tracing::{debug, info};

use super::error::StoreResult;
use super::preferences::{keys, Preferences};

/// Snapshot of the durable install ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallRecovery {
    /// Install submitted to the engine and not yet finished.
    pub active_install_id: Option<String>,
    /// Install finished, waiting for the device to reboot.
    pub pending_reboot_id: Option<String>,
}

impl InstallRecovery {
    /// Read the current state.
    pub fn load(prefs: &Preferences) -> Self {
        Self {
            active_install_id: prefs.get_string(keys::INSTALLING_AB_ID),
            pending_reboot_id: prefs.get_string(keys::NEEDS_REBOOT_ID),
        }
    }

    /// Whether an install is in flight or waiting for a reboot.
    pub fn is_busy(&self) -> bool {
        self.active_install_id.is_some() || self.pending_reboot_id.is_some()
    }

    /// Whether `download_id` is in flight or waiting for a reboot.
    pub fn involves(&self, download_id: &str) -> bool {
        self.active_install_id.as_deref() == Some(download_id)
            || self.pending_reboot_id.as_deref() == Some(download_id)
    }

    /// Persist `download_id` as the install in flight.
    pub fn mark_installing(prefs: &Preferences, download_id: &str) -> StoreResult<()> {
        debug!(download_id, "Recording streaming install in flight");
        prefs.store().set(keys::INSTALLING_AB_ID, download_id)
    }

    /// Finish the install in flight.
    ///
    /// With `needs_reboot` the in-flight id moves to the reboot slot;
    /// otherwise the reboot slot is cleared too. Returns the id that was
    /// in flight.
    pub fn finish(prefs: &Preferences, needs_reboot: bool) -> StoreResult<Option<String>> {
        let active = prefs.get_string(keys::INSTALLING_AB_ID);
        let reboot_id = if needs_reboot { active.clone() } else { None };
        prefs.store().apply(&[
            (keys::NEEDS_REBOOT_ID, reboot_id),
            (keys::INSTALLING_AB_ID, None),
        ])?;
        Ok(active)
    }

    /// Drop every installer-persisted id.
    pub fn clear(prefs: &Preferences) -> StoreResult<()> {
        prefs.store().apply(&[
            (keys::INSTALLING_AB_ID, None),
            (keys::NEEDS_REBOOT_ID, None),
        ])
    }

    /// The device rebooted: nothing waits for a reboot any more.
    pub fn on_boot_completed(prefs: &Preferences) -> StoreResult<()> {
        if let Some(id) = prefs.get_string(keys::NEEDS_REBOOT_ID) {
            info!(download_id = %id, "Reboot completed, clearing pending install");
        }
        prefs.store().remove(keys::NEEDS_REBOOT_ID)
    }
}
