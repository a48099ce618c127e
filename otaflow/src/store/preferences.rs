//! Typed view over the updater's settings keys.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::error::StoreResult;
use super::settings::{SettingEdit, SettingsStore};

/// Settings keys used by the updater.
pub mod keys {
    /// Delete a package once it has been installed.
    pub const AUTO_DELETE_UPDATES: &str = "auto_delete_updates";
    /// Let the update engine use more resources while applying.
    pub const AB_PERF_MODE: &str = "ab_perf_mode";
    /// Verify downloaded artifacts before they become installable.
    pub const VERIFY_MODE: &str = "verify_mode";
    /// Id of the streaming install in flight.
    pub const INSTALLING_AB_ID: &str = "installing_ab_id";
    /// Id of the streaming install waiting for a reboot.
    pub const NEEDS_REBOOT_ID: &str = "needs_reboot_id";
    /// Build timestamp that was running when the last legacy install started.
    pub const INSTALL_OLD_TIMESTAMP: &str = "install_old_timestamp";
    /// Build timestamp of the package being installed.
    pub const INSTALL_NEW_TIMESTAMP: &str = "install_new_timestamp";
    /// Path of the package being installed.
    pub const INSTALL_PACKAGE_PATH: &str = "install_package_path";
    /// Whether the last install reinstalled the running build.
    pub const INSTALL_AGAIN: &str = "install_again";
    /// Whether the user was told about the outcome of the last install.
    pub const INSTALL_NOTIFIED: &str = "install_notified";
    /// Whether the one-time orphan cleanup of the download directory ran.
    pub const CLEANUP_DONE: &str = "cleanup_done";
}

/// Bookkeeping recorded before a legacy install hands off to the apply
/// primitive; inspected after the next boot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallBookkeeping {
    pub old_timestamp: Option<i64>,
    pub new_timestamp: Option<i64>,
    pub package_path: Option<PathBuf>,
    pub install_again: bool,
    pub notified: bool,
}

/// Typed accessors over a [`SettingsStore`].
///
/// Reads never fail: malformed or missing values fall back to the default.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn SettingsStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.store.get(key) {
            Some(value) => match value.as_str() {
                "true" => true,
                "false" => false,
                other => {
                    warn!(key, value = other, "Ignoring malformed boolean setting");
                    default
                }
            },
            None => default,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.store.get(key)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(key, value = %value, "Ignoring malformed integer setting");
                None
            }
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|v| !v.is_empty())
    }

    pub fn set_bool(&self, key: &str, value: bool) -> StoreResult<()> {
        self.store.set(key, if value { "true" } else { "false" })
    }

    pub fn set_i64(&self, key: &str, value: i64) -> StoreResult<()> {
        self.store.set(key, &value.to_string())
    }

    pub fn auto_delete_updates(&self) -> bool {
        self.get_bool(keys::AUTO_DELETE_UPDATES, false)
    }

    pub fn set_auto_delete_updates(&self, enable: bool) -> StoreResult<()> {
        self.set_bool(keys::AUTO_DELETE_UPDATES, enable)
    }

    pub fn performance_mode(&self) -> bool {
        self.get_bool(keys::AB_PERF_MODE, false)
    }

    pub fn set_performance_mode(&self, enable: bool) -> StoreResult<()> {
        self.set_bool(keys::AB_PERF_MODE, enable)
    }

    pub fn verify_mode(&self) -> bool {
        self.get_bool(keys::VERIFY_MODE, true)
    }

    pub fn set_verify_mode(&self, enable: bool) -> StoreResult<()> {
        self.set_bool(keys::VERIFY_MODE, enable)
    }

    pub fn cleanup_done(&self) -> bool {
        self.get_bool(keys::CLEANUP_DONE, false)
    }

    pub fn set_cleanup_done(&self) -> StoreResult<()> {
        self.set_bool(keys::CLEANUP_DONE, true)
    }

    /// Read the legacy install bookkeeping.
    pub fn install_bookkeeping(&self) -> InstallBookkeeping {
        InstallBookkeeping {
            old_timestamp: self.get_i64(keys::INSTALL_OLD_TIMESTAMP),
            new_timestamp: self.get_i64(keys::INSTALL_NEW_TIMESTAMP),
            package_path: self.get_string(keys::INSTALL_PACKAGE_PATH).map(PathBuf::from),
            install_again: self.get_bool(keys::INSTALL_AGAIN, false),
            notified: self.get_bool(keys::INSTALL_NOTIFIED, false),
        }
    }

    /// Record a legacy install about to start.
    ///
    /// `install_again` is set when the running build is the one that was
    /// running at the previous install: the previous install did not change
    /// the build, so this one cannot be told apart from a failed attempt.
    /// Without a previous record the install also counts as a reinstall.
    pub fn record_install_start(
        &self,
        running_build: i64,
        target_build: i64,
        package_path: &std::path::Path,
    ) -> StoreResult<()> {
        let previous_build = self
            .get_i64(keys::INSTALL_OLD_TIMESTAMP)
            .unwrap_or(running_build);
        let install_again = previous_build == running_build;

        let edits: [SettingEdit<'_>; 5] = [
            (keys::INSTALL_OLD_TIMESTAMP, Some(running_build.to_string())),
            (keys::INSTALL_NEW_TIMESTAMP, Some(target_build.to_string())),
            (
                keys::INSTALL_PACKAGE_PATH,
                Some(package_path.display().to_string()),
            ),
            (keys::INSTALL_AGAIN, Some(install_again.to_string())),
            (keys::INSTALL_NOTIFIED, Some(false.to_string())),
        ];
        self.store.apply(&edits)
    }

    pub fn set_install_notified(&self) -> StoreResult<()> {
        self.set_bool(keys::INSTALL_NOTIFIED, true)
    }

    /// Forget the last installed package path.
    pub fn clear_install_package_path(&self) -> StoreResult<()> {
        self.store.remove(keys::INSTALL_PACKAGE_PATH)
    }
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences").finish_non_exhaustive()
    }
}
