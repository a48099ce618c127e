//! Dual-partition installer driving the update engine.
//!
//! The engine outlives this process: the id of the install in flight and the
//! id waiting for a reboot are persisted through [`InstallRecovery`], and
//! [`StreamingInstaller::reconnect`] picks an install back up after a restart.

use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::engine::{EngineCallback, EngineErrorCode, EngineStatus, UpdateEngine};
use super::error::InstallError;
use super::{InstallContext, Installer, InstallerKind};
use crate::archive::{self, PAYLOAD_BIN, PAYLOAD_PROPERTIES};
use crate::store::InstallRecovery;
use crate::update::UpdateStatus;

#[derive(Default)]
struct StreamingState {
    /// Update the engine callbacks refer to.
    download_id: Option<String>,
    bound: bool,
    /// Set from admission until the payload is handed to the engine.
    submitting: bool,
}

struct StreamingInner {
    ctx: InstallContext,
    engine: Arc<dyn UpdateEngine>,
    state: Mutex<StreamingState>,
}

/// Installs streaming packages through an [`UpdateEngine`].
#[derive(Clone)]
pub struct StreamingInstaller {
    inner: Arc<StreamingInner>,
}

/// Clears the submission flag when an install attempt ends.
struct Submission<'a> {
    state: &'a Mutex<StreamingState>,
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        self.state.lock().submitting = false;
    }
}

/// Engine callback registered on bind. Holds the installer weakly so the
/// engine connection does not keep it alive.
struct EngineBridge {
    inner: Weak<StreamingInner>,
}

impl EngineCallback for EngineBridge {
    fn on_status_update(&self, status: EngineStatus, percent: f32) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_status_update(status, percent);
        }
    }

    fn on_payload_application_complete(&self, code: EngineErrorCode) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_payload_application_complete(code);
        }
    }
}

impl StreamingInner {
    fn current_id(&self) -> Option<String> {
        self.state.lock().download_id.clone()
    }

    fn installation_done(&self, needs_reboot: bool) {
        match InstallRecovery::finish(&self.ctx.prefs, needs_reboot) {
            Ok(Some(id)) if needs_reboot => info!(download_id = %id, "Update waits for reboot"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Could not persist install state"),
        }
    }

    fn on_status_update(&self, status: EngineStatus, percent: f32) {
        debug!(?status, percent, "Update engine status");
        let registry = &self.ctx.registry;

        let known = self
            .current_id()
            .filter(|id| registry.snapshot(id).is_some());
        let Some(download_id) = known else {
            // The id came from durable state and the record may be gone.
            self.installation_done(status == EngineStatus::UpdatedNeedReboot);
            return;
        };

        match status {
            EngineStatus::Downloading | EngineStatus::Finalizing => {
                let progress = (percent * 100.0).round().clamp(0.0, 100.0) as u8;
                registry.modify(&download_id, |record, events| {
                    if record.status != UpdateStatus::Installing {
                        record.status = UpdateStatus::Installing;
                        events.status_changed(&download_id);
                    }
                    record.install_progress = progress;
                    record.finalizing = status == EngineStatus::Finalizing;
                    events.install_progress(&download_id);
                });
            }
            EngineStatus::UpdatedNeedReboot => {
                self.installation_done(true);
                registry.modify(&download_id, |record, events| {
                    record.install_progress = 0;
                    record.finalizing = false;
                    record.status = UpdateStatus::Installed;
                    events.status_changed(&download_id);
                });
                if self.ctx.prefs.auto_delete_updates() {
                    info!(download_id = %download_id, "Deleting installed update");
                    registry.delete_update(&download_id);
                }
            }
            EngineStatus::Idle => {
                // The engine is not working on anything we recorded.
                self.installation_done(false);
            }
            _ => {}
        }
    }

    fn on_payload_application_complete(&self, code: EngineErrorCode) {
        if code.is_success() {
            return;
        }
        warn!(code = code.0, "Payload application failed");
        self.installation_done(false);

        if let Some(download_id) = self.current_id() {
            self.ctx.registry.modify(&download_id, |record, events| {
                record.install_progress = 0;
                record.finalizing = false;
                record.status = UpdateStatus::InstallationFailed;
                events.status_changed(&download_id);
            });
        }
    }
}

impl StreamingInstaller {
    pub(crate) fn new(ctx: InstallContext, engine: Arc<dyn UpdateEngine>) -> Self {
        Self {
            inner: Arc::new(StreamingInner {
                ctx,
                engine,
                state: Mutex::new(StreamingState::default()),
            }),
        }
    }

    fn recovery(&self) -> InstallRecovery {
        InstallRecovery::load(&self.inner.ctx.prefs)
    }

    /// Admits one install at a time. The persisted recovery state only turns
    /// busy right before submission, so the flag covers the parsing and
    /// binding in between.
    fn begin_submission(&self) -> Option<Submission<'_>> {
        let mut state = self.inner.state.lock();
        if state.submitting || self.recovery().is_busy() {
            return None;
        }
        state.submitting = true;
        Some(Submission {
            state: &self.inner.state,
        })
    }

    fn fail(&self, download_id: &str) {
        self.inner
            .ctx
            .registry
            .set_status(download_id, UpdateStatus::InstallationFailed);
    }

    /// Bind to the engine unless already bound.
    fn ensure_bound(&self) -> Result<(), InstallError> {
        if self.inner.state.lock().bound {
            return Ok(());
        }
        let bridge: Arc<dyn EngineCallback> = Arc::new(EngineBridge {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.engine.bind(bridge).map_err(|e| {
            error!(error = %e, "Could not bind to the update engine");
            InstallError::BindFailed(e)
        })?;
        self.inner.state.lock().bound = true;
        Ok(())
    }

    /// Re-attach to an install that was in flight before a restart.
    ///
    /// Returns `false` when nothing is in flight or binding fails. Once
    /// bound, the engine reports its current status.
    pub fn reconnect(&self) -> bool {
        let recovery = self.recovery();
        if !recovery.is_busy() {
            debug!("Not installing any update, nothing to reconnect");
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            if state.bound {
                return true;
            }
            state.download_id = recovery.active_install_id;
        }

        info!("Reconnecting to the update engine");
        self.ensure_bound().is_ok()
    }

    /// Forward the performance mode to the engine.
    pub fn set_performance_mode(&self, enable: bool) {
        self.inner.engine.set_performance_mode(enable);
    }

    /// Whether `download_id` finished installing and waits for a reboot.
    pub fn is_waiting_for_reboot(&self, download_id: &str) -> bool {
        self.recovery().pending_reboot_id.as_deref() == Some(download_id)
    }

    /// Whether the engine connection is established.
    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().bound
    }
}

impl Installer for StreamingInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Streaming
    }

    fn install(&self, download_id: &str) -> Result<(), InstallError> {
        let Some(_submission) = self.begin_submission() else {
            error!(download_id, "Already installing an update");
            return Err(InstallError::AlreadyInstalling);
        };

        let ctx = &self.inner.ctx;
        let record = ctx
            .registry
            .snapshot(download_id)
            .ok_or_else(|| InstallError::UnknownUpdate(download_id.to_string()))?;

        let package = match record.local_file {
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

        let offset = archive::payload_offset(&package, PAYLOAD_BIN)?;
        let headers = archive::read_properties(&package, PAYLOAD_PROPERTIES)?;

        self.inner.state.lock().download_id = Some(download_id.to_string());

        if let Err(e) = self.ensure_bound() {
            self.fail(download_id);
            return Err(e);
        }

        self.inner
            .engine
            .set_performance_mode(ctx.prefs.performance_mode());

        // Persist before submitting: the engine may call back right away.
        InstallRecovery::mark_installing(&ctx.prefs, download_id)?;
        ctx.registry.set_status(download_id, UpdateStatus::Installing);

        let url = payload_url(&package);
        info!(download_id, url = %url, offset, "Submitting payload");
        if let Err(e) = self.inner.engine.apply_payload(&url, offset, 0, &headers) {
            error!(download_id, error = %e, "Update engine rejected the payload");
            self.inner.installation_done(false);
            self.fail(download_id);
            return Err(InstallError::Engine(e));
        }

        Ok(())
    }

    fn cancel(&self) -> Result<(), InstallError> {
        if !self.recovery().is_busy() {
            debug!("Not installing any update");
            return Err(InstallError::NotInstalling);
        }
        if !self.inner.state.lock().bound {
            error!("Not connected to the update engine");
            return Err(InstallError::NotBound);
        }

        self.inner.engine.cancel()?;
        self.inner.installation_done(false);

        if let Some(download_id) = self.inner.current_id() {
            info!(download_id = %download_id, "Installation cancelled");
            self.inner
                .ctx
                .registry
                .set_status(&download_id, UpdateStatus::InstallationCancelled);
        }
        Ok(())
    }

    fn is_installing(&self) -> bool {
        self.inner.state.lock().submitting || self.recovery().is_busy()
    }

    fn is_installing_update(&self, download_id: &str) -> bool {
        let submitting = {
            let state = self.inner.state.lock();
            state.submitting && state.download_id.as_deref() == Some(download_id)
        };
        submitting || self.recovery().involves(download_id)
    }
}

fn payload_url(package: &Path) -> String {
    let absolute = if package.is_absolute() {
        package.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(package))
            .unwrap_or_else(|_| package.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceProfile;
    use crate::controller::Registry;
    use crate::events::{EventBus, UpdateEvent};
    use crate::install::EngineError;
    use crate::store::{keys, MemorySettingsStore, MemoryUpdateStore, Preferences, UpdateStore};
    use crate::update::UpdateRecord;
    use crate::wakelock::NoopWakeLock;
    use std::fs;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::broadcast::Receiver;
    use zip::write::SimpleFileOptions;

    #[derive(Default)]
    struct FakeEngine {
        fail_bind: bool,
        fail_apply: bool,
        /// Keeps `bind` from returning while set.
        hold_bind: AtomicBool,
        binding: AtomicBool,
        callback: Mutex<Option<Arc<dyn EngineCallback>>>,
        applied: Mutex<Vec<(String, u64, u64, Vec<String>)>>,
        perf_mode: Mutex<Option<bool>>,
        cancelled: Mutex<bool>,
    }

    impl FakeEngine {
        fn status(&self, status: EngineStatus, percent: f32) {
            let callback = self.callback.lock().clone();
            if let Some(callback) = callback {
                callback.on_status_update(status, percent);
            }
        }

        fn complete(&self, code: EngineErrorCode) {
            let callback = self.callback.lock().clone();
            if let Some(callback) = callback {
                callback.on_payload_application_complete(code);
            }
        }
    }

    impl UpdateEngine for FakeEngine {
        fn bind(&self, callback: Arc<dyn EngineCallback>) -> Result<(), EngineError> {
            self.binding.store(true, Ordering::SeqCst);
            while self.hold_bind.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            if self.fail_bind {
                return Err(EngineError::new("service unavailable"));
            }
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn apply_payload(
            &self,
            url: &str,
            offset: u64,
            size: u64,
            headers: &[String],
        ) -> Result<(), EngineError> {
            if self.fail_apply {
                return Err(EngineError::new("busy"));
            }
            self.applied
                .lock()
                .push((url.to_string(), offset, size, headers.to_vec()));
            Ok(())
        }

        fn cancel(&self) -> Result<(), EngineError> {
            *self.cancelled.lock() = true;
            Ok(())
        }

        fn set_performance_mode(&self, enable: bool) {
            *self.perf_mode.lock() = Some(enable);
        }
    }

    struct Fixture {
        _temp: TempDir,
        registry: Registry,
        prefs: Preferences,
        store: Arc<MemoryUpdateStore>,
        package: PathBuf,
    }

    fn write_package(path: &Path) {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("META-INF/com/android/metadata", stored).unwrap();
        zip.write_all(b"ota-type=AB\n").unwrap();
        zip.start_file(PAYLOAD_BIN, stored).unwrap();
        zip.write_all(&[0u8; 512]).unwrap();
        zip.start_file(PAYLOAD_PROPERTIES, stored).unwrap();
        zip.write_all(b"FILE_HASH=abc\nFILE_SIZE=512\n").unwrap();
        fs::write(path, zip.finish().unwrap().into_inner()).unwrap();
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let package = temp.path().join("ab.zip");
        write_package(&package);

        let store = Arc::new(MemoryUpdateStore::new());
        let registry = Registry::new(
            EventBus::new(64),
            Arc::new(NoopWakeLock),
            store.clone(),
            Duration::from_millis(1000),
        );
        let mut record = UpdateRecord::new("ab", "ab.zip", "https://example.com/ab.zip")
            .with_local_file(&package);
        record.available_online = true;
        store.upsert(&record).unwrap();
        let entry = registry.new_entry(record);
        registry.lock().entries.insert("ab".to_string(), entry);

        Fixture {
            _temp: temp,
            registry,
            prefs: Preferences::new(Arc::new(MemorySettingsStore::new())),
            store,
            package,
        }
    }

    fn installer(fx: &Fixture, engine: Arc<FakeEngine>) -> StreamingInstaller {
        StreamingInstaller::new(
            InstallContext {
                registry: fx.registry.clone(),
                prefs: fx.prefs.clone(),
                device: DeviceProfile::new(1_000).with_dual_partition(true),
            },
            engine,
        )
    }

    fn drain(events: &mut Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_install_submits_payload() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        fx.prefs.set_performance_mode(true).unwrap();

        installer.install("ab").unwrap();

        let applied = engine.applied.lock();
        let (url, offset, size, headers) = &applied[0];
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with("ab.zip"));
        assert_eq!(
            *offset,
            archive::payload_offset(&fx.package, PAYLOAD_BIN).unwrap()
        );
        assert_eq!(*size, 0);
        assert_eq!(headers, &vec!["FILE_HASH=abc", "FILE_SIZE=512"]);
        assert_eq!(*engine.perf_mode.lock(), Some(true));

        assert_eq!(
            fx.prefs.get_string(keys::INSTALLING_AB_ID).as_deref(),
            Some("ab")
        );
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::Installing
        );
        assert!(installer.is_installing());
        assert!(installer.is_installing_update("ab"));
    }

    #[test]
    fn test_install_rejected_while_waiting_for_reboot() {
        let fx = fixture();
        fx.prefs.store().set(keys::NEEDS_REBOOT_ID, "old").unwrap();
        let installer = installer(&fx, Arc::new(FakeEngine::default()));

        assert!(matches!(
            installer.install("ab"),
            Err(InstallError::AlreadyInstalling)
        ));
    }

    #[test]
    fn test_install_rejected_while_submitting() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        engine.hold_bind.store(true, Ordering::SeqCst);
        let installer = installer(&fx, engine.clone());

        let worker = {
            let installer = installer.clone();
            std::thread::spawn(move || installer.install("ab"))
        };
        let deadline = Instant::now() + Duration::from_secs(10);
        while !engine.binding.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(10));
        }

        // Nothing persisted yet, the submission alone marks the install.
        assert!(fx.prefs.get_string(keys::INSTALLING_AB_ID).is_none());
        assert!(installer.is_installing());
        assert!(installer.is_installing_update("ab"));
        assert!(matches!(
            installer.install("ab"),
            Err(InstallError::AlreadyInstalling)
        ));

        engine.hold_bind.store(false, Ordering::SeqCst);
        worker.join().unwrap().unwrap();
        assert_eq!(engine.applied.lock().len(), 1);
        assert!(installer.is_installing());
    }

    #[test]
    fn test_failed_submission_releases_admission() {
        let fx = fixture();
        let installer = installer(
            &fx,
            Arc::new(FakeEngine {
                fail_bind: true,
                ..Default::default()
            }),
        );

        assert!(installer.install("ab").is_err());
        assert!(!installer.is_installing());
        assert!(!installer.inner.state.lock().submitting);
    }

    #[test]
    fn test_protocol_error_leaves_state_untouched() {
        let fx = fixture();
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("system.new.dat", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"data").unwrap();
        fs::write(&fx.package, zip.finish().unwrap().into_inner()).unwrap();

        let mut events = fx.registry.events().subscribe();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());

        assert!(matches!(
            installer.install("ab"),
            Err(InstallError::Protocol(_))
        ));
        assert!(drain(&mut events).is_empty());
        assert_eq!(fx.registry.snapshot("ab").unwrap().status, UpdateStatus::Unknown);
        assert!(engine.callback.lock().is_none());
        assert!(!installer.is_installing());
    }

    #[test]
    fn test_missing_artifact_fails_install() {
        let fx = fixture();
        fs::remove_file(&fx.package).unwrap();
        let installer = installer(&fx, Arc::new(FakeEngine::default()));

        assert!(matches!(
            installer.install("ab"),
            Err(InstallError::ArtifactMissing { .. })
        ));
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::InstallationFailed
        );
    }

    #[test]
    fn test_bind_failure_fails_install() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine {
            fail_bind: true,
            ..Default::default()
        });
        let installer = installer(&fx, engine);

        assert!(matches!(
            installer.install("ab"),
            Err(InstallError::BindFailed(_))
        ));
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::InstallationFailed
        );
        assert!(!installer.is_installing());
    }

    #[test]
    fn test_rejected_payload_rolls_back() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine {
            fail_apply: true,
            ..Default::default()
        });
        let installer = installer(&fx, engine);

        assert!(matches!(installer.install("ab"), Err(InstallError::Engine(_))));
        assert_eq!(fx.prefs.get_string(keys::INSTALLING_AB_ID), None);
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::InstallationFailed
        );
    }

    #[test]
    fn test_progress_callbacks() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        installer.install("ab").unwrap();
        let mut events = fx.registry.events().subscribe();

        engine.status(EngineStatus::Downloading, 0.254);
        let record = fx.registry.snapshot("ab").unwrap();
        assert_eq!(record.install_progress, 25);
        assert!(!record.finalizing);
        // Already installing: only a progress event.
        assert_eq!(
            drain(&mut events),
            vec![UpdateEvent::InstallProgress("ab".into())]
        );

        engine.status(EngineStatus::Finalizing, 0.999);
        let record = fx.registry.snapshot("ab").unwrap();
        assert_eq!(record.install_progress, 100);
        assert!(record.finalizing);
    }

    #[test]
    fn test_updated_need_reboot_moves_id() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        installer.install("ab").unwrap();

        engine.status(EngineStatus::UpdatedNeedReboot, 1.0);

        assert_eq!(fx.prefs.get_string(keys::INSTALLING_AB_ID), None);
        assert_eq!(
            fx.prefs.get_string(keys::NEEDS_REBOOT_ID).as_deref(),
            Some("ab")
        );
        let record = fx.registry.snapshot("ab").unwrap();
        assert_eq!(record.status, UpdateStatus::Installed);
        assert_eq!(record.install_progress, 0);
        assert!(installer.is_waiting_for_reboot("ab"));
        assert!(installer.is_installing());

        InstallRecovery::on_boot_completed(&fx.prefs).unwrap();
        assert!(!installer.is_installing());
    }

    #[test]
    fn test_updated_need_reboot_auto_deletes() {
        let fx = fixture();
        fx.prefs.set_auto_delete_updates(true).unwrap();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        installer.install("ab").unwrap();

        engine.status(EngineStatus::UpdatedNeedReboot, 1.0);

        // Still listed online, so the record stays as Deleted.
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::Deleted
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fx.package.exists() || fx.store.contains("ab") {
            assert!(std::time::Instant::now() < deadline, "artifact not deleted");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_payload_failure_marks_failed() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        installer.install("ab").unwrap();
        engine.status(EngineStatus::Downloading, 0.5);

        engine.complete(EngineErrorCode::SUCCESS);
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::Installing
        );

        engine.complete(EngineErrorCode(20));
        let record = fx.registry.snapshot("ab").unwrap();
        assert_eq!(record.status, UpdateStatus::InstallationFailed);
        assert_eq!(record.install_progress, 0);
        assert!(!installer.is_installing());
        assert_eq!(fx.prefs.get_string(keys::NEEDS_REBOOT_ID), None);
    }

    #[test]
    fn test_idle_clears_recovery_state() {
        let fx = fixture();
        fx.prefs.store().set(keys::INSTALLING_AB_ID, "ab").unwrap();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());

        assert!(installer.reconnect());
        engine.status(EngineStatus::Idle, 0.0);

        assert!(!installer.is_installing());
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::Unknown
        );
    }

    #[test]
    fn test_status_for_vanished_record_finalises_recovery() {
        let fx = fixture();
        fx.prefs.store().set(keys::INSTALLING_AB_ID, "gone").unwrap();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());

        assert!(installer.reconnect());
        engine.status(EngineStatus::UpdatedNeedReboot, 1.0);

        assert_eq!(
            fx.prefs.get_string(keys::NEEDS_REBOOT_ID).as_deref(),
            Some("gone")
        );
        assert_eq!(fx.prefs.get_string(keys::INSTALLING_AB_ID), None);
    }

    #[test]
    fn test_reconnect() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        assert!(!installer.reconnect());
        assert!(!installer.is_bound());

        fx.prefs.store().set(keys::INSTALLING_AB_ID, "ab").unwrap();
        assert!(installer.reconnect());
        assert!(installer.is_bound());
        assert!(installer.reconnect());

        engine.status(EngineStatus::Downloading, 0.1);
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::Installing
        );
    }

    #[test]
    fn test_reconnect_bind_failure() {
        let fx = fixture();
        fx.prefs.store().set(keys::INSTALLING_AB_ID, "ab").unwrap();
        let engine = Arc::new(FakeEngine {
            fail_bind: true,
            ..Default::default()
        });
        let installer = installer(&fx, engine);
        assert!(!installer.reconnect());
    }

    #[test]
    fn test_cancel() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        assert!(matches!(installer.cancel(), Err(InstallError::NotInstalling)));

        installer.install("ab").unwrap();
        installer.cancel().unwrap();

        assert!(*engine.cancelled.lock());
        assert!(!installer.is_installing());
        assert_eq!(
            fx.registry.snapshot("ab").unwrap().status,
            UpdateStatus::InstallationCancelled
        );
    }

    #[test]
    fn test_cancel_requires_binding() {
        let fx = fixture();
        fx.prefs.store().set(keys::INSTALLING_AB_ID, "ab").unwrap();
        let installer = installer(&fx, Arc::new(FakeEngine::default()));
        assert!(matches!(installer.cancel(), Err(InstallError::NotBound)));
    }

    #[test]
    fn test_dropped_installer_ignores_callbacks() {
        let fx = fixture();
        let engine = Arc::new(FakeEngine::default());
        let installer = installer(&fx, engine.clone());
        installer.install("ab").unwrap();
        drop(installer);

        engine.status(EngineStatus::UpdatedNeedReboot, 1.0);
        assert_eq!(
            fx.prefs.get_string(keys::INSTALLING_AB_ID).as_deref(),
            Some("ab")
        );
    }
}
