//! Application bootstrap implementation.
//!
//! `UpdaterApp::start` runs the startup sequence in a fixed order:
//!
//! 1. Validate the configuration and create the working directories
//! 2. Open the settings and update stores
//! 3. Clean the download directory
//! 4. Build the controller and both installers
//! 5. Restore stored updates (not available online until a catalog says so)
//! 6. Reconnect to a streaming install left in flight by a previous process

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::cleanup::{cleanup_download_dir, CleanupReport};
use crate::config::UpdaterConfig;
use crate::controller::{BootReport, Controller, ControllerParts, Registry};
use crate::download::TransportFactory;
use crate::error::{UpdaterError, UpdaterResult};
use crate::events::EventBus;
use crate::install::{PackageApplier, UpdateEngine};
use crate::store::{
    IniSettingsStore, InstallRecovery, JsonUpdateStore, Preferences, SettingsStore, UpdateStore,
};
use crate::verify::Verifier;
use crate::wakelock::{NoopWakeLock, WakeLock};

/// Host services the updater is built on.
///
/// The transport, verifier, apply primitive and update engine are required.
/// Stores default to files under the configured state directory and the
/// wake lock defaults to [`NoopWakeLock`].
pub struct Collaborators {
    transports: Arc<dyn TransportFactory>,
    verifier: Arc<dyn Verifier>,
    applier: Arc<dyn PackageApplier>,
    engine: Arc<dyn UpdateEngine>,
    wake_lock: Arc<dyn WakeLock>,
    settings: Option<Arc<dyn SettingsStore>>,
    updates: Option<Arc<dyn UpdateStore>>,
}

impl Collaborators {
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        verifier: Arc<dyn Verifier>,
        applier: Arc<dyn PackageApplier>,
        engine: Arc<dyn UpdateEngine>,
    ) -> Self {
        Self {
            transports,
            verifier,
            applier,
            engine,
            wake_lock: Arc::new(NoopWakeLock),
            settings: None,
            updates: None,
        }
    }

    /// Use the host's keep-awake facility.
    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    /// Use a settings store other than the INI file in the state directory.
    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use an update store other than the JSON file in the state directory.
    pub fn with_update_store(mut self, updates: Arc<dyn UpdateStore>) -> Self {
        self.updates = Some(updates);
        self
    }
}

/// The updater with its startup sequence run.
pub struct UpdaterApp {
    controller: Controller,
    config: UpdaterConfig,
    cleanup: CleanupReport,
}

impl UpdaterApp {
    /// Start the updater.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a working
    /// directory cannot be created or a store cannot be opened.
    pub fn start(config: UpdaterConfig, collaborators: Collaborators) -> UpdaterResult<Self> {
        config.validate()?;
        create_dir(&config.download_dir)?;
        create_dir(&config.state_dir)?;

        let settings: Arc<dyn SettingsStore> = match collaborators.settings {
            Some(settings) => settings,
            None => Arc::new(IniSettingsStore::open(config.settings_path())?),
        };
        let updates: Arc<dyn UpdateStore> = match collaborators.updates {
            Some(updates) => updates,
            None => Arc::new(JsonUpdateStore::open(config.updates_path())?),
        };
        let prefs = Preferences::new(settings);

        let cleanup = cleanup_download_dir(
            &config.download_dir,
            &prefs,
            updates.as_ref(),
            config.device.build_timestamp,
        );
        info!(
            staged = cleanup.staged_removed,
            orphans = cleanup.orphans_removed,
            installed = cleanup.installed_package_removed,
            "Cleaned download directory"
        );

        let registry = Registry::new(
            EventBus::new(config.event_capacity),
            collaborators.wake_lock,
            Arc::clone(&updates),
            config.progress_report_interval,
        );
        let controller = Controller::new(ControllerParts {
            registry,
            prefs: prefs.clone(),
            device: config.device,
            download_dir: config.download_dir.clone(),
            install_progress_interval: config.install_progress_interval,
            transports: collaborators.transports,
            verifier: collaborators.verifier,
            applier: collaborators.applier,
            engine: collaborators.engine,
        });

        let stored = updates.load_all()?;
        let restored = stored
            .into_iter()
            .map(|record| controller.add_update(record, false))
            .filter(|&added| added)
            .count();
        info!(restored, "Restored stored updates");

        let recovery = InstallRecovery::load(&prefs);
        if recovery.is_busy() {
            info!(?recovery, "Update installation in flight, reconnecting");
            if !controller.reconnect_streaming() {
                warn!("Could not reconnect to the update engine");
            }
        }

        Ok(Self {
            controller,
            config,
            cleanup,
        })
    }

    /// Handle to the controller.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// What the startup cleanup removed.
    pub fn cleanup_report(&self) -> &CleanupReport {
        &self.cleanup
    }

    /// Handle the device finishing a boot.
    pub fn on_boot_completed(&self) -> UpdaterResult<BootReport> {
        self.controller.on_boot_completed()
    }

    /// Whether downloads, verification or an installation are still active.
    pub fn should_keep_running(&self) -> bool {
        self.controller.has_active_downloads()
            || self.controller.is_verifying()
            || self.controller.is_installing()
    }
}

fn create_dir(path: &Path) -> UpdaterResult<()> {
    fs::create_dir_all(path).map_err(|source| UpdaterError::CreateDirFailed {
        path: path.to_path_buf(),
        source,
    })
}
