//! The authoritative set of update records.
//!
//! All record mutations go through the registry lock, and events are
//! published while it is held, so events for one id are seen in the order
//! the transitions happened. Slow work (transport calls, verification, file
//! deletion) happens after the lock is released.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::download::{DownloadTransport, ProgressThrottle};
use crate::events::EventBus;
use crate::store::UpdateStore;
use crate::update::{PersistentStatus, UpdateRecord, UpdateStatus};
use crate::wakelock::{AwakeGuard, WakeLock};

/// One registered update and its download session, if any.
pub(crate) struct Entry {
    pub record: UpdateRecord,
    pub transport: Option<Arc<dyn DownloadTransport>>,
    /// Session of the attached transport; callbacks from other sessions are stale.
    pub session: u64,
    pub throttle: ProgressThrottle,
}

/// State guarded by the registry lock.
pub(crate) struct RegistryState {
    pub entries: BTreeMap<String, Entry>,
    pub verifying: HashSet<String>,
    active_downloads: usize,
    next_session: u64,
    awake: Option<AwakeGuard>,
}

impl RegistryState {
    pub fn active_downloads(&self) -> usize {
        self.active_downloads
    }

    pub fn next_session(&mut self) -> u64 {
        self.next_session += 1;
        self.next_session
    }

    /// Entry of `id` if `session` is its attached download session.
    pub fn current_session(&mut self, id: &str, session: u64) -> Option<&mut Entry> {
        self.entries
            .get_mut(id)
            .filter(|e| e.transport.is_some() && e.session == session)
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    events: EventBus,
    wake_lock: Arc<dyn WakeLock>,
    store: Arc<dyn UpdateStore>,
    progress_interval: Duration,
}

/// Shared handle to the registry.
#[derive(Clone)]
pub(crate) struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(
        events: EventBus,
        wake_lock: Arc<dyn WakeLock>,
        store: Arc<dyn UpdateStore>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    entries: BTreeMap::new(),
                    verifying: HashSet::new(),
                    active_downloads: 0,
                    next_session: 0,
                    awake: None,
                }),
                events,
                wake_lock,
                store,
                progress_interval,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn UpdateStore> {
        &self.inner.store
    }

    /// New entry wrapping `record`, with a fresh progress throttle.
    pub fn new_entry(&self, record: UpdateRecord) -> Entry {
        Entry {
            record,
            transport: None,
            session: 0,
            throttle: ProgressThrottle::new(self.inner.progress_interval),
        }
    }

    /// Attach a download session to `entry`, counting it as active.
    pub fn attach(
        &self,
        state: &mut RegistryState,
        id: &str,
        transport: Arc<dyn DownloadTransport>,
        session: u64,
    ) {
        let progress_interval = self.inner.progress_interval;
        let Some(entry) = state.entries.get_mut(id) else {
            return;
        };
        if entry.transport.is_some() {
            return;
        }
        entry.transport = Some(transport);
        entry.session = session;
        entry.throttle = ProgressThrottle::new(progress_interval);
        state.active_downloads += 1;
        self.refresh_awake(state);
    }

    /// Detach the download session of `id`, returning its transport.
    pub fn detach(
        &self,
        state: &mut RegistryState,
        id: &str,
    ) -> Option<Arc<dyn DownloadTransport>> {
        let transport = state.entries.get_mut(id)?.transport.take()?;
        state.active_downloads = state.active_downloads.saturating_sub(1);
        self.refresh_awake(state);
        Some(transport)
    }

    /// Hold the wake lock exactly while downloads are active.
    fn refresh_awake(&self, state: &mut RegistryState) {
        if state.active_downloads > 0 {
            if state.awake.is_none() {
                state.awake = Some(AwakeGuard::acquire(Arc::clone(&self.inner.wake_lock)));
            }
        } else {
            state.awake = None;
        }
    }

    /// Snapshot of one record.
    pub fn snapshot(&self, id: &str) -> Option<UpdateRecord> {
        self.lock().entries.get(id).map(|e| e.record.clone())
    }

    /// Mutate a record under the lock. `None` if the id is unknown.
    pub fn modify<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut UpdateRecord, &EventBus) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(id)?;
        Some(f(&mut entry.record, &self.inner.events))
    }

    /// Set the status of a record and announce it.
    pub fn set_status(&self, id: &str, status: UpdateStatus) -> bool {
        self.modify(id, |record, events| {
            record.status = status;
            events.status_changed(id);
        })
        .is_some()
    }

    /// Delete the artifact of a record that is not downloading.
    ///
    /// The record is evicted when it is no longer listed online, otherwise
    /// it stays registered with status `Deleted`.
    pub fn delete_update(&self, id: &str) -> bool {
        let record = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(id) else {
                return false;
            };
            if entry.transport.is_some() {
                debug!(download_id = id, "Refusing to delete an update being downloaded");
                return false;
            }

            let record = &mut entry.record;
            record.status = UpdateStatus::Deleted;
            record.progress = 0;
            record.persistent_status = PersistentStatus::Unknown;
            let snapshot = record.clone();

            if snapshot.available_online {
                self.inner.events.status_changed(id);
            } else {
                info!(download_id = id, "Update no longer available online, removing");
                state.entries.remove(id);
                self.inner.events.removed(id);
            }
            snapshot
        };

        self.delete_artifact_async(record.download_id, record.local_file);
        true
    }

    /// Remove an artifact and its stored metadata on a worker thread.
    ///
    /// Falls back to deleting on the calling thread when no worker can be
    /// spawned.
    pub fn delete_artifact_async(&self, download_id: String, local_file: Option<PathBuf>) {
        let store = Arc::clone(&self.inner.store);
        let name = format!("delete-{download_id}");
        let (id, path) = (download_id.clone(), local_file.clone());
        let spawned = thread::Builder::new().name(name).spawn(move || {
            delete_artifact(&id, path.as_deref(), store.as_ref());
        });
        if let Err(e) = spawned {
            warn!(download_id = %download_id, error = %e, "Failed to spawn deletion worker, deleting inline");
            delete_artifact(&download_id, local_file.as_deref(), self.inner.store.as_ref());
        }
    }
}

fn delete_artifact(download_id: &str, local_file: Option<&std::path::Path>, store: &dyn UpdateStore) {
    if let Some(path) = local_file {
        if path.exists() {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Deleted artifact"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not delete artifact"),
            }
        }
    }
    if let Err(e) = store.remove(download_id) {
        warn!(download_id, error = %e, "Could not remove stored update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUpdateStore;
    use crate::wakelock::NoopWakeLock;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct CountingLock {
        held: AtomicI32,
    }

    impl WakeLock for CountingLock {
        fn acquire(&self) {
            self.held.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct IdleTransport;

    impl DownloadTransport for IdleTransport {
        fn start(&self) {}
        fn resume(&self) {}
        fn cancel(&self) {}
    }

    fn registry_with(lock: Arc<dyn WakeLock>) -> Registry {
        Registry::new(
            EventBus::new(16),
            lock,
            Arc::new(MemoryUpdateStore::new()),
            Duration::from_millis(1000),
        )
    }

    fn insert(registry: &Registry, id: &str, online: bool) {
        let mut record = UpdateRecord::new(id, format!("{id}.zip"), "https://example.com");
        record.available_online = online;
        let entry = registry.new_entry(record);
        registry.lock().entries.insert(id.to_string(), entry);
    }

    #[test]
    fn test_wake_lock_follows_active_downloads() {
        let lock = Arc::new(CountingLock::default());
        let registry = registry_with(lock.clone());
        insert(&registry, "a", true);
        insert(&registry, "b", true);

        let mut state = registry.lock();
        registry.attach(&mut state, "a", Arc::new(IdleTransport), 1);
        registry.attach(&mut state, "b", Arc::new(IdleTransport), 2);
        assert_eq!(state.active_downloads(), 2);
        assert_eq!(lock.held.load(Ordering::SeqCst), 1);

        registry.detach(&mut state, "a");
        assert_eq!(lock.held.load(Ordering::SeqCst), 1);
        registry.detach(&mut state, "b");
        assert_eq!(state.active_downloads(), 0);
        assert_eq!(lock.held.load(Ordering::SeqCst), 0);

        // Detaching twice does not underflow.
        assert!(registry.detach(&mut state, "b").is_none());
        assert_eq!(state.active_downloads(), 0);
    }

    #[test]
    fn test_current_session_filters_stale_callbacks() {
        let registry = registry_with(Arc::new(NoopWakeLock));
        insert(&registry, "a", true);

        let mut state = registry.lock();
        registry.attach(&mut state, "a", Arc::new(IdleTransport), 7);
        assert!(state.current_session("a", 7).is_some());
        assert!(state.current_session("a", 6).is_none());

        registry.detach(&mut state, "a");
        assert!(state.current_session("a", 7).is_none());
    }

    #[test]
    fn test_delete_keeps_online_record() {
        let registry = registry_with(Arc::new(NoopWakeLock));
        let mut events = registry.events().subscribe();
        insert(&registry, "a", true);

        assert!(registry.delete_update("a"));
        let record = registry.snapshot("a").unwrap();
        assert_eq!(record.status, UpdateStatus::Deleted);
        assert_eq!(
            events.try_recv().unwrap(),
            crate::events::UpdateEvent::StatusChanged("a".into())
        );
    }

    #[test]
    fn test_delete_evicts_offline_record() {
        let registry = registry_with(Arc::new(NoopWakeLock));
        let mut events = registry.events().subscribe();
        insert(&registry, "a", false);

        assert!(registry.delete_update("a"));
        assert!(registry.snapshot("a").is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            crate::events::UpdateEvent::Removed("a".into())
        );
    }

    #[test]
    fn test_delete_artifact_removes_file_and_metadata() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("a.zip");
        fs::write(&path, b"partial").unwrap();
        let store = MemoryUpdateStore::new();
        let record = UpdateRecord::new("a", "a.zip", "https://example.com").with_local_file(&path);
        store.upsert(&record).unwrap();

        delete_artifact("a", Some(&path), &store);

        assert!(!path.exists());
        assert!(!store.contains("a"));

        // Nothing left to delete is not an error.
        delete_artifact("a", Some(&path), &store);
        delete_artifact("b", None, &store);
    }

    #[test]
    fn test_delete_artifact_async_reaches_store() {
        let store = Arc::new(MemoryUpdateStore::new());
        let registry = Registry::new(
            EventBus::new(16),
            Arc::new(NoopWakeLock),
            store.clone(),
            Duration::from_millis(1000),
        );
        store
            .upsert(&UpdateRecord::new("a", "a.zip", "https://example.com"))
            .unwrap();

        registry.delete_artifact_async("a".to_string(), None);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.contains("a") && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_delete_refused_while_downloading() {
        let registry = registry_with(Arc::new(NoopWakeLock));
        insert(&registry, "a", false);
        {
            let mut state = registry.lock();
            registry.attach(&mut state, "a", Arc::new(IdleTransport), 1);
        }

        assert!(!registry.delete_update("a"));
        assert!(registry.snapshot("a").is_some());
    }
}
