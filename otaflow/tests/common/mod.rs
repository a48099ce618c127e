//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use zip::write::SimpleFileOptions;

use otaflow::config::{DeviceProfile, UpdaterConfig};
use otaflow::download::{
    DownloadListener, DownloadRequest, DownloadTransport, ResponseHeaders, TransferProgress,
    TransportError, TransportFactory,
};
use otaflow::install::{
    EngineCallback, EngineError, EngineErrorCode, EngineStatus, PackageApplier, UpdateEngine,
};
use otaflow::store::{MemorySettingsStore, MemoryUpdateStore, SettingsStore, UpdateStore};
use otaflow::verify::{VerificationError, Verifier};
use otaflow::wakelock::WakeLock;
use otaflow::{Collaborators, UpdateEvent, UpdateRecord, UpdaterApp};

/// Build timestamp of the simulated running system.
pub const RUNNING_BUILD: i64 = 1_700_000_000;

// ============================================================================
// Transport
// ============================================================================

/// Calls made on a fake transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    Start,
    Resume,
    Cancel,
}

/// One download session created by the controller.
pub struct FakeTransport {
    pub request: DownloadRequest,
    listener: Arc<dyn DownloadListener>,
    calls: Mutex<Vec<TransportCall>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn headers(&self, content_length: u64) {
        self.listener.on_headers(&ResponseHeaders {
            status: 200,
            url: self.request.url.clone(),
            headers: vec![("Content-Length".to_string(), content_length.to_string())],
        });
    }

    pub fn progress(&self, bytes_read: u64, content_length: Option<u64>) {
        self.listener.on_progress(TransferProgress {
            bytes_read,
            content_length,
            speed: 1024,
            eta: 3,
            done: false,
        });
    }

    /// Write `contents` to the destination and report success.
    pub fn complete(&self, contents: &[u8]) {
        fs::write(&self.request.destination, contents).unwrap();
        self.listener.on_success(&self.request.destination);
    }

    pub fn fail(&self) {
        self.listener.on_failure(&TransportError::Request {
            url: self.request.url.clone(),
            reason: "connection reset".to_string(),
        });
    }

    pub fn cancelled(&self) {
        self.listener.on_failure(&TransportError::Cancelled);
    }
}

impl DownloadTransport for FakeTransport {
    fn start(&self) {
        self.calls.lock().push(TransportCall::Start);
    }

    fn resume(&self) {
        self.calls.lock().push(TransportCall::Resume);
    }

    fn cancel(&self) {
        self.calls.lock().push(TransportCall::Cancel);
    }
}

/// Records every transport it creates; tests drive them by hand.
#[derive(Default)]
pub struct FakeTransportFactory {
    pub fail: AtomicBool,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recent session created for `download_id`.
    pub fn last(&self, download_id: &str) -> Arc<FakeTransport> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|t| t.request.download_id == download_id)
            .cloned()
            .unwrap_or_else(|| panic!("no transport created for {download_id}"))
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<Arc<dyn DownloadTransport>, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Build("no network".to_string()));
        }
        let transport = Arc::new(FakeTransport {
            request,
            listener,
            calls: Mutex::new(Vec::new()),
        });
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ============================================================================
// Verification and installation
// ============================================================================

/// Accepts or rejects every artifact.
pub struct FakeVerifier {
    pub accept: AtomicBool,
    pub calls: AtomicI32,
}

impl Default for FakeVerifier {
    fn default() -> Self {
        Self {
            accept: AtomicBool::new(true),
            calls: AtomicI32::new(0),
        }
    }
}

impl Verifier for FakeVerifier {
    fn verify(&self, _path: &Path, record: &UpdateRecord) -> Result<(), VerificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.accept.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VerificationError::Rejected(format!(
                "bad signature on {}",
                record.download_id
            )))
        }
    }
}

#[derive(Default)]
pub struct FakeApplier {
    pub staging: AtomicBool,
    /// `apply` waits while this is set.
    pub blocked: AtomicBool,
    /// Calls to `apply` that have started.
    pub entered: AtomicI32,
    pub applied: Mutex<Vec<PathBuf>>,
}

impl PackageApplier for FakeApplier {
    fn requires_staging(&self, _package: &Path) -> bool {
        self.staging.load(Ordering::SeqCst)
    }

    fn apply(&self, package: &Path) -> io::Result<()> {
        self.applied.lock().push(package.to_path_buf());
        self.entered.fetch_add(1, Ordering::SeqCst);
        while self.blocked.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Update engine that records requests; tests fire its callbacks.
#[derive(Default)]
pub struct FakeEngine {
    callback: Mutex<Option<Arc<dyn EngineCallback>>>,
    pub binds: AtomicI32,
    pub applied: Mutex<Vec<(String, u64, Vec<String>)>>,
    pub cancelled: AtomicBool,
    pub perf_mode: Mutex<Option<bool>>,
}

impl FakeEngine {
    pub fn status(&self, status: EngineStatus, percent: f32) {
        let callback = self.callback.lock().clone();
        callback.expect("engine not bound").on_status_update(status, percent);
    }

    pub fn complete(&self, code: EngineErrorCode) {
        let callback = self.callback.lock().clone();
        callback
            .expect("engine not bound")
            .on_payload_application_complete(code);
    }
}

impl UpdateEngine for FakeEngine {
    fn bind(&self, callback: Arc<dyn EngineCallback>) -> Result<(), EngineError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn apply_payload(
        &self,
        url: &str,
        offset: u64,
        _size: u64,
        headers: &[String],
    ) -> Result<(), EngineError> {
        self.applied
            .lock()
            .push((url.to_string(), offset, headers.to_vec()));
        Ok(())
    }

    fn cancel(&self) -> Result<(), EngineError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_performance_mode(&self, enable: bool) {
        *self.perf_mode.lock() = Some(enable);
    }
}

/// Wake lock counting how often it is held.
#[derive(Default)]
pub struct CountingWakeLock {
    pub held: AtomicI32,
    pub acquisitions: AtomicI32,
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self) {
        self.held.fetch_add(1, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// A started updater over fakes and in-memory stores.
pub struct Harness {
    pub temp: TempDir,
    pub app: UpdaterApp,
    pub transports: Arc<FakeTransportFactory>,
    pub verifier: Arc<FakeVerifier>,
    pub applier: Arc<FakeApplier>,
    pub engine: Arc<FakeEngine>,
    pub wake_lock: Arc<CountingWakeLock>,
    pub settings: Arc<MemorySettingsStore>,
    pub updates: Arc<MemoryUpdateStore>,
}

/// Builder for [`Harness`], to seed stores before startup.
pub struct HarnessBuilder {
    temp: TempDir,
    device: DeviceProfile,
    settings: Arc<MemorySettingsStore>,
    updates: Arc<MemoryUpdateStore>,
    engine: Arc<FakeEngine>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            device: DeviceProfile::new(RUNNING_BUILD).with_dual_partition(true),
            settings: Arc::new(MemorySettingsStore::new()),
            updates: Arc::new(MemoryUpdateStore::new()),
            engine: Arc::new(FakeEngine::default()),
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.temp.path().join("downloads")
    }

    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    pub fn setting(self, key: &str, value: &str) -> Self {
        self.settings.set(key, value).unwrap();
        self
    }

    pub fn stored(self, record: UpdateRecord) -> Self {
        self.updates.upsert(&record).unwrap();
        self
    }

    pub fn engine(mut self, engine: Arc<FakeEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn start(self) -> Harness {
        let transports = Arc::new(FakeTransportFactory::default());
        let verifier = Arc::new(FakeVerifier::default());
        let applier = Arc::new(FakeApplier::default());
        let wake_lock = Arc::new(CountingWakeLock::default());

        let config = UpdaterConfig::new(self.device)
            .with_download_dir(self.temp.path().join("downloads"))
            .with_state_dir(self.temp.path().join("state"));
        let collaborators = Collaborators::new(
            transports.clone(),
            verifier.clone(),
            applier.clone(),
            self.engine.clone(),
        )
        .with_wake_lock(wake_lock.clone())
        .with_settings_store(self.settings.clone())
        .with_update_store(self.updates.clone());

        let app = UpdaterApp::start(config, collaborators).unwrap();
        Harness {
            temp: self.temp,
            app,
            transports,
            verifier,
            applier,
            engine: self.engine,
            wake_lock,
            settings: self.settings,
            updates: self.updates,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().start()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.app.config().download_dir.clone()
    }
}

/// A catalog entry for an update newer than the running build.
pub fn catalog_update(id: &str) -> UpdateRecord {
    UpdateRecord::new(id, format!("{id}.zip"), format!("https://updates.example.com/{id}.zip"))
        .with_version("15.0")
        .with_timestamp(RUNNING_BUILD + 86_400)
}

/// Bytes of a package that streams through the update engine.
pub fn streaming_package() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("care_map.pb", stored).unwrap();
    zip.write_all(b"care").unwrap();
    zip.start_file("payload.bin", stored).unwrap();
    zip.write_all(&[0xAB; 1024]).unwrap();
    zip.start_file("payload_properties.txt", stored).unwrap();
    zip.write_all(b"FILE_HASH=aGFzaA==\nFILE_SIZE=1024\nMETADATA_HASH=bWV0YQ==\nMETADATA_SIZE=64\n")
        .unwrap();
    zip.finish().unwrap().into_inner()
}

/// Bytes of a whole-package update.
pub fn legacy_package() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("META-INF/com/google/android/updater-script", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"ui_print(\"installing\");\n").unwrap();
    zip.start_file("system.new.dat", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(&[0u8; 4096]).unwrap();
    zip.finish().unwrap().into_inner()
}

// ============================================================================
// Events
// ============================================================================

/// Wait for the next event.
pub async fn next_event(events: &mut Receiver<UpdateEvent>) -> UpdateEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Events published so far, without waiting.
pub fn drain(events: &mut Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

/// Wait until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Drive `download_id` through a complete download and verification.
pub async fn download_and_verify(harness: &Harness, download_id: &str, contents: &[u8]) {
    let controller = harness.app.controller();
    assert!(controller.start_download(download_id));
    let transport = harness.transports.last(download_id);
    transport.headers(contents.len() as u64);
    transport.complete(contents);
    wait_until(|| !controller.is_verifying_update(download_id)).await;
}

pub fn file_exists(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
