//! Update lifecycle controller.
//!
//! The [`Controller`] owns the registry of known updates and drives each one
//! through download, verification and installation:
//!
//! ```text
//! add_update ──► start_download ──► Starting ──► Downloading ──► Verifying
//!                      ▲                 │                          │
//!                      │       pause / failure               ┌──────┴──────┐
//!                resume_download ◄── Paused(Error)       Verified   VerificationFailed
//!                                                            │
//!                                                         install ──► Installing ──► Installed
//! ```
//!
//! Transport callbacks and verification run on worker threads. Every
//! transition happens under the registry lock and is announced on the
//! [`EventBus`] before the lock is released.

mod reconcile;
mod registry;
mod session;
mod verification;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::DeviceProfile;
use crate::download::{
    unique_destination, DownloadRequest, DownloadTransport, TransportError, TransportFactory,
};
use crate::error::{UpdaterError, UpdaterResult};
use crate::events::{EventBus, UpdateEvent};
use crate::install::{
    InstallContext, InstallError, Installer, InstallerKind, LegacyInstaller, PackageApplier,
    StreamingInstaller, UpdateEngine,
};
use crate::store::{InstallRecovery, Preferences};
use crate::update::{PersistentStatus, UpdateRecord, UpdateStatus};
use crate::verify::Verifier;

pub(crate) use registry::Registry;

use reconcile::reconcile_status;
use session::SessionListener;

/// Outcome of the boot-completed reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootReport {
    /// The last whole-package install did not change the running build.
    pub last_install_failed: bool,
}

/// Everything the controller is assembled from.
pub(crate) struct ControllerParts {
    pub registry: Registry,
    pub prefs: Preferences,
    pub device: DeviceProfile,
    pub download_dir: PathBuf,
    pub install_progress_interval: Duration,
    pub transports: Arc<dyn TransportFactory>,
    pub verifier: Arc<dyn Verifier>,
    pub applier: Arc<dyn PackageApplier>,
    pub engine: Arc<dyn UpdateEngine>,
}

pub(crate) struct ControllerInner {
    registry: Registry,
    prefs: Preferences,
    device: DeviceProfile,
    download_dir: PathBuf,
    transports: Arc<dyn TransportFactory>,
    verifier: Arc<dyn Verifier>,
    legacy: LegacyInstaller,
    streaming: StreamingInstaller,
    /// Held from the busy check until the installer has taken the update.
    install_admission: Mutex<()>,
}

/// Handle to the update lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        let ctx = InstallContext {
            registry: parts.registry.clone(),
            prefs: parts.prefs.clone(),
            device: parts.device,
        };
        let legacy = LegacyInstaller::new(
            ctx.clone(),
            parts.applier,
            parts.install_progress_interval,
        );
        let streaming = StreamingInstaller::new(ctx, parts.engine);

        Self {
            inner: Arc::new(ControllerInner {
                registry: parts.registry,
                prefs: parts.prefs,
                device: parts.device,
                download_dir: parts.download_dir,
                transports: parts.transports,
                verifier: parts.verifier,
                legacy,
                streaming,
                install_admission: Mutex::new(()),
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.registry.events().subscribe()
    }

    /// The event bus the controller publishes on.
    pub fn events(&self) -> &EventBus {
        self.inner.registry.events()
    }

    /// Typed preferences shared with the installers.
    pub fn preferences(&self) -> &Preferences {
        &self.inner.prefs
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register an update.
    ///
    /// For a known id only the online flag (AND-ed with the current one)
    /// and the download URL are refreshed, and `false` is returned. A new
    /// record gets its status reconciled with the artifact on disk; a record
    /// whose artifact vanished and that is not online is dropped together
    /// with its stored metadata.
    pub fn add_update(&self, record: UpdateRecord, available_online: bool) -> bool {
        let registry = &self.inner.registry;
        let download_id = record.download_id.clone();
        debug!(download_id = %download_id, "Adding update");

        let mut state = registry.lock();
        if let Some(entry) = state.entries.get_mut(&download_id) {
            debug!(download_id = %download_id, "Update already added");
            let existing = &mut entry.record;
            existing.available_online = available_online && existing.available_online;
            existing.download_url = record.download_url;
            return false;
        }

        let mut record = record;
        if !reconcile_status(&mut record, self.inner.device.build_timestamp) && !available_online {
            record.persistent_status = PersistentStatus::Unknown;
            drop(state);
            info!(download_id = %download_id, "Update has an invalid status and is not online");
            registry.delete_artifact_async(download_id, record.local_file);
            return false;
        }

        record.available_online = available_online;
        let entry = registry.new_entry(record);
        state.entries.insert(download_id, entry);
        true
    }

    /// Mark exactly the listed updates as available online.
    ///
    /// With `purge_unknown`, unlisted updates that were never downloaded are
    /// evicted and a `Removed` event is published for each.
    pub fn set_available_online_batch<I, S>(&self, ids: I, purge_unknown: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listed: HashSet<String> = ids.into_iter().map(Into::into).collect();
        let registry = &self.inner.registry;
        let mut state = registry.lock();

        let mut evict = Vec::new();
        for (id, entry) in state.entries.iter_mut() {
            let online = listed.contains(id);
            entry.record.available_online = online;
            if !online
                && purge_unknown
                && entry.transport.is_none()
                && entry.record.persistent_status == PersistentStatus::Unknown
            {
                evict.push(id.clone());
            }
        }

        for id in evict {
            debug!(download_id = %id, "No longer available online, removing");
            state.entries.remove(&id);
            registry.events().removed(&id);
        }
    }

    /// Mark the listed updates as no longer available online.
    pub fn set_not_available_online<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.inner.registry.lock();
        for id in ids {
            if let Some(entry) = state.entries.get_mut(id.as_ref()) {
                entry.record.available_online = false;
            }
        }
    }

    /// Snapshot of one update.
    pub fn get_update(&self, download_id: &str) -> Option<UpdateRecord> {
        self.inner.registry.snapshot(download_id)
    }

    /// Snapshots of all updates, ordered by id.
    pub fn get_updates(&self) -> Vec<UpdateRecord> {
        let state = self.inner.registry.lock();
        state.entries.values().map(|e| e.record.clone()).collect()
    }

    /// Ids of all updates.
    pub fn get_ids(&self) -> Vec<String> {
        self.inner.registry.lock().entries.keys().cloned().collect()
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Start downloading an update into a fresh file.
    pub fn start_download(&self, download_id: &str) -> bool {
        info!(download_id, "Starting download");
        let inner = &self.inner;
        let registry = &inner.registry;

        let transport = {
            let mut state = registry.lock();
            let session = state.next_session();
            let Some(entry) = state.entries.get_mut(download_id) else {
                return false;
            };
            if entry.transport.is_some() {
                return false;
            }

            let Some(destination) = unique_destination(&inner.download_dir, &entry.record.name)
            else {
                error!(download_id, name = %entry.record.name, "Update has no usable file name");
                inner.announce(&mut state, download_id, UpdateStatus::PausedError);
                return false;
            };
            debug!(download_id, destination = %destination.display(), "Download destination");
            entry.record.local_file = Some(destination.clone());
            let url = entry.record.download_url.clone();

            match inner.create_transport(download_id, url, destination, session) {
                Ok(transport) => {
                    registry.attach(&mut state, download_id, Arc::clone(&transport), session);
                    inner.announce(&mut state, download_id, UpdateStatus::Starting);
                    transport
                }
                Err(e) => {
                    error!(download_id, error = %e, "Could not build download transport");
                    inner.announce(&mut state, download_id, UpdateStatus::PausedError);
                    return false;
                }
            }
        };

        transport.start();
        true
    }

    /// Resume a paused download, or verify it straight away when the
    /// artifact is already complete.
    pub fn resume_download(&self, download_id: &str) -> bool {
        info!(download_id, "Resuming download");
        let inner = &self.inner;
        let registry = &inner.registry;

        let transport = {
            let mut state = registry.lock();
            let session = state.next_session();
            let Some(entry) = state.entries.get_mut(download_id) else {
                return false;
            };
            if entry.transport.is_some() {
                return false;
            }

            let record = &entry.record;
            let (Some(destination), Some(len)) = (record.local_file.clone(), record.local_file_len())
            else {
                error!(download_id, "Destination file doesn't exist, can't resume");
                inner.announce(&mut state, download_id, UpdateStatus::PausedError);
                return false;
            };

            if record.file_size > 0 && len >= record.file_size {
                debug!(download_id, "File already downloaded, starting verification");
                state.verifying.insert(download_id.to_string());
                inner.announce(&mut state, download_id, UpdateStatus::Verifying);
                None
            } else {
                let url = record.download_url.clone();
                match inner.create_transport(download_id, url, destination, session) {
                    Ok(transport) => {
                        registry.attach(&mut state, download_id, Arc::clone(&transport), session);
                        inner.announce(&mut state, download_id, UpdateStatus::Starting);
                        Some(transport)
                    }
                    Err(e) => {
                        error!(download_id, error = %e, "Could not build download transport");
                        inner.announce(&mut state, download_id, UpdateStatus::PausedError);
                        return false;
                    }
                }
            }
        };

        match transport {
            Some(transport) => transport.resume(),
            None => inner.spawn_verification(download_id),
        }
        true
    }

    /// Stop an active download, keeping the partial artifact.
    pub fn pause_download(&self, download_id: &str) -> bool {
        info!(download_id, "Pausing download");
        let registry = &self.inner.registry;

        let transport = {
            let mut state = registry.lock();
            let Some(transport) = registry.detach(&mut state, download_id) else {
                return false;
            };
            if let Some(entry) = state.entries.get_mut(download_id) {
                let record = &mut entry.record;
                record.status = UpdateStatus::Paused;
                record.eta = 0;
                record.speed = 0;
                registry.events().status_changed(download_id);
            }
            transport
        };

        transport.cancel();
        true
    }

    /// Delete the artifact of an update that is not downloading.
    pub fn delete_update(&self, download_id: &str) -> bool {
        info!(download_id, "Deleting update");
        self.inner.registry.delete_update(download_id)
    }

    pub fn is_downloading(&self, download_id: &str) -> bool {
        self.inner
            .registry
            .lock()
            .entries
            .get(download_id)
            .is_some_and(|e| e.transport.is_some())
    }

    pub fn has_active_downloads(&self) -> bool {
        self.inner.registry.lock().active_downloads() > 0
    }

    /// Whether any artifact is being verified.
    pub fn is_verifying(&self) -> bool {
        !self.inner.registry.lock().verifying.is_empty()
    }

    pub fn is_verifying_update(&self, download_id: &str) -> bool {
        self.inner.registry.lock().verifying.contains(download_id)
    }

    // ========================================================================
    // Installation
    // ========================================================================

    /// Whether either installer has an install in flight (or, for the
    /// streaming installer, waiting for a reboot).
    pub fn is_installing(&self) -> bool {
        self.inner.legacy.is_installing() || self.inner.streaming.is_installing()
    }

    pub fn is_installing_update(&self, download_id: &str) -> bool {
        self.inner.legacy.is_installing_update(download_id)
            || self.inner.streaming.is_installing_update(download_id)
    }

    pub fn is_installing_streaming_update(&self) -> bool {
        self.inner.streaming.is_installing()
    }

    pub fn is_waiting_for_reboot(&self, download_id: &str) -> bool {
        self.inner.streaming.is_waiting_for_reboot(download_id)
    }

    /// Persist the engine performance mode, applying it right away on
    /// dual-partition devices.
    pub fn set_performance_mode(&self, enable: bool) -> UpdaterResult<()> {
        self.inner.prefs.set_performance_mode(enable)?;
        if self.inner.device.supports_dual_partition {
            self.inner.streaming.set_performance_mode(enable);
        }
        Ok(())
    }

    /// Install a verified update with the installer its package calls for.
    pub fn install(&self, download_id: &str) -> UpdaterResult<InstallerKind> {
        let inner = &self.inner;
        let record = self
            .get_update(download_id)
            .ok_or_else(|| UpdaterError::UnknownUpdate(download_id.to_string()))?;

        if record.persistent_status != PersistentStatus::Verified {
            return Err(UpdaterError::NotVerified(download_id.to_string()));
        }
        let Some(_admission) = inner.install_admission.try_lock() else {
            warn!(download_id, "Another install is being started");
            return Err(InstallError::AlreadyInstalling.into());
        };
        if self.is_installing() {
            warn!(download_id, "Another update is being installed");
            return Err(InstallError::AlreadyInstalling.into());
        }

        let kind = match record.local_file.as_deref() {
            Some(path) => InstallerKind::for_package(path).map_err(InstallError::from),
            None => Err(InstallError::ArtifactMissing {
                download_id: download_id.to_string(),
                path: None,
            }),
        };
        let kind = match kind {
            Ok(kind) => kind,
            Err(e) => {
                error!(download_id, error = %e, "Could not inspect update package");
                inner
                    .registry
                    .set_status(download_id, UpdateStatus::InstallationFailed);
                return Err(e.into());
            }
        };

        info!(download_id, installer = %kind, "Installing update");
        let installer: &dyn Installer = match kind {
            InstallerKind::Legacy => &inner.legacy,
            InstallerKind::Streaming => &inner.streaming,
        };
        installer.install(download_id)?;
        Ok(kind)
    }

    /// Cancel the installation in flight.
    pub fn cancel_install(&self) -> UpdaterResult<()> {
        let inner = &self.inner;
        if inner.legacy.is_installing() {
            inner.legacy.cancel()?;
        } else if inner.streaming.is_installing() {
            inner.streaming.reconnect();
            inner.streaming.cancel()?;
        } else {
            return Err(InstallError::NotInstalling.into());
        }
        Ok(())
    }

    /// Re-attach the streaming installer to an install left in flight by a
    /// previous process.
    pub fn reconnect_streaming(&self) -> bool {
        self.inner.streaming.reconnect()
    }

    /// Handle the device finishing a boot.
    ///
    /// Clears the id waiting for a reboot, and reports once whether the last
    /// whole-package install left the device on the build it started from.
    pub fn on_boot_completed(&self) -> UpdaterResult<BootReport> {
        let prefs = &self.inner.prefs;
        InstallRecovery::on_boot_completed(prefs)?;

        let book = prefs.install_bookkeeping();
        let last_install_failed = !book.install_again
            && !book.notified
            && book.old_timestamp == Some(self.inner.device.build_timestamp);
        if last_install_failed {
            warn!(
                build = self.inner.device.build_timestamp,
                "Last update installation did not change the build"
            );
            prefs.set_install_notified()?;
        }

        Ok(BootReport {
            last_install_failed,
        })
    }
}

impl ControllerInner {
    /// Set the status of `download_id` under an already-held lock.
    fn announce(
        &self,
        state: &mut registry::RegistryState,
        download_id: &str,
        status: UpdateStatus,
    ) {
        if let Some(entry) = state.entries.get_mut(download_id) {
            entry.record.status = status;
            self.registry.events().status_changed(download_id);
        }
    }

    fn create_transport(
        self: &Arc<Self>,
        download_id: &str,
        url: String,
        destination: PathBuf,
        session: u64,
    ) -> Result<Arc<dyn DownloadTransport>, TransportError> {
        let listener = Arc::new(SessionListener::new(
            Arc::downgrade(self),
            download_id.to_string(),
            session,
        ));
        let request = DownloadRequest {
            download_id: download_id.to_string(),
            url,
            destination,
        };
        self.transports.create(request, listener)
    }
}
