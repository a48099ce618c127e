//! Whole-package installer.
//!
//! Packages the apply primitive can read directly are handed over at once.
//! Otherwise a worker first copies the package to `<file>.uncrypt`, reporting
//! install progress, and applies the copy. Only the copy can be cancelled;
//! once the primitive has the package the installer is out of the loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::PackageApplier;
use super::error::{InstallError, StagingError};
use super::staging::copy_with_progress;
use super::{InstallContext, Installer, InstallerKind};
use crate::download::{staging_path, IntervalGate};
use crate::update::UpdateStatus;

#[derive(Default)]
struct LegacyState {
    /// Update being staged or handed to the apply primitive.
    installing: Option<String>,
    /// Set while the staging copy runs.
    copy_cancel: Option<CancellationToken>,
}

/// Installs whole packages through a [`PackageApplier`].
#[derive(Clone)]
pub struct LegacyInstaller {
    ctx: InstallContext,
    applier: Arc<dyn PackageApplier>,
    progress_interval: Duration,
    state: Arc<Mutex<LegacyState>>,
}

impl LegacyInstaller {
    pub(crate) fn new(
        ctx: InstallContext,
        applier: Arc<dyn PackageApplier>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            applier,
            progress_interval,
            state: Arc::new(Mutex::new(LegacyState::default())),
        }
    }

    fn fail(&self, download_id: &str) {
        self.ctx
            .registry
            .set_status(download_id, UpdateStatus::InstallationFailed);
    }

    fn apply(&self, download_id: &str, package: &Path) -> Result<(), InstallError> {
        info!(download_id, package = %package.display(), "Applying package");
        self.applier.apply(package).map_err(|e| {
            error!(download_id, error = %e, "Could not install update");
            InstallError::Apply {
                path: package.to_path_buf(),
                source: e,
            }
        })
    }

    fn spawn_staging(
        &self,
        download_id: &str,
        package: PathBuf,
        cancel: CancellationToken,
    ) -> Result<(), InstallError> {
        let worker = self.clone();
        let id = download_id.to_string();
        let failed_path = package.clone();

        thread::Builder::new()
            .name(format!("stage-{download_id}"))
            .spawn(move || worker.stage_and_apply(&id, &package, &cancel))
            .map(|_| ())
            .map_err(|e| InstallError::Apply {
                path: failed_path,
                source: e,
            })
    }

    fn stage_and_apply(&self, download_id: &str, package: &Path, cancel: &CancellationToken) {
        let staged = staging_path(package);
        let registry = &self.ctx.registry;
        let mut gate = IntervalGate::new(self.progress_interval);
        let copied = copy_with_progress(package, &staged, cancel, |progress| {
            if gate.ready(Instant::now()) {
                registry.modify(download_id, |record, events| {
                    record.install_progress = progress;
                    events.install_progress(download_id);
                });
            }
        });

        // Past this point the install can no longer be cancelled.
        let cancelled = {
            let mut state = self.state.lock();
            state.copy_cancel = None;
            cancel.is_cancelled()
        };

        let outcome = match copied {
            Ok(()) if !cancelled => match self.apply(download_id, &staged) {
                Ok(()) => None,
                Err(_) => Some(UpdateStatus::InstallationFailed),
            },
            Ok(()) | Err(StagingError::Cancelled) => {
                info!(download_id, "Staging copy cancelled");
                remove_staged(&staged);
                registry.modify(download_id, |record, _| record.install_progress = 0);
                Some(UpdateStatus::InstallationCancelled)
            }
            Err(e) => {
                error!(download_id, error = %e, "Could not copy update");
                remove_staged(&staged);
                Some(UpdateStatus::InstallationFailed)
            }
        };

        registry.modify(download_id, |record, events| {
            if let Some(status) = outcome {
                record.status = status;
            }
            events.status_changed(download_id);
        });
        self.state.lock().installing = None;
    }
}

fn remove_staged(staged: &Path) {
    if staged.exists() {
        if let Err(e) = fs::remove_file(staged) {
            warn!(path = %staged.display(), error = %e, "Could not delete staged copy");
        }
    }
}

impl Installer for LegacyInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Legacy
    }

    fn install(&self, download_id: &str) -> Result<(), InstallError> {
        if self.state.lock().installing.is_some() {
            error!(download_id, "Already installing an update");
            return Err(InstallError::AlreadyInstalling);
        }

        let record = self
            .ctx
            .registry
            .snapshot(download_id)
            .ok_or_else(|| InstallError::UnknownUpdate(download_id.to_string()))?;

        let package = match record.local_file.clone() {
            Some(path) if path.exists() => path,
            path => {
                error!(download_id, "The given update doesn't exist");
                self.fail(download_id);
                return Err(InstallError::ArtifactMissing {
                    download_id: download_id.to_string(),
                    path,
                });
            }
        };

        self.ctx.prefs.record_install_start(
            self.ctx.device.build_timestamp,
            record.timestamp,
            &package,
        )?;

        let cancel = self
            .applier
            .requires_staging(&package)
            .then(CancellationToken::new);
        {
            let mut state = self.state.lock();
            if state.installing.is_some() {
                return Err(InstallError::AlreadyInstalling);
            }
            state.installing = Some(download_id.to_string());
            state.copy_cancel = cancel.clone();
        }

        if let Some(cancel) = cancel {
            self.ctx
                .registry
                .set_status(download_id, UpdateStatus::Installing);

            debug!(download_id, "Package needs a staging copy");
            if let Err(e) = self.spawn_staging(download_id, package, cancel) {
                let mut state = self.state.lock();
                state.installing = None;
                state.copy_cancel = None;
                drop(state);
                self.fail(download_id);
                return Err(e);
            }
            return Ok(());
        }

        // Held while the primitive has the package, so no second install starts.
        let applied = self.apply(download_id, &package);
        self.state.lock().installing = None;
        if let Err(e) = applied {
            self.fail(download_id);
            return Err(e);
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), InstallError> {
        let state = self.state.lock();
        match &state.copy_cancel {
            Some(token) => {
                info!("Cancelling staging copy");
                token.cancel();
                Ok(())
            }
            None if state.installing.is_some() => {
                debug!("Nothing to cancel");
                Err(InstallError::NotCancellable)
            }
            None => Err(InstallError::NotInstalling),
        }
    }

    fn is_installing(&self) -> bool {
        self.state.lock().installing.is_some()
    }

    fn is_installing_update(&self, download_id: &str) -> bool {
        self.state.lock().installing.as_deref() == Some(download_id)
    }
}
