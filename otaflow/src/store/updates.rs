//! Durable per-update metadata.
//!
//! Records are stored with their [`PersistentStatus`]; the ephemeral status,
//! progress and transfer figures are rebuilt on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};
use crate::update::{PersistentStatus, UpdateRecord};

/// Storage for update metadata that must survive restarts.
pub trait UpdateStore: Send + Sync {
    /// All stored records, in id order.
    fn load_all(&self) -> StoreResult<Vec<UpdateRecord>>;

    /// Insert or replace the stored metadata of `record`.
    fn upsert(&self, record: &UpdateRecord) -> StoreResult<()>;

    /// Change the persistent status of a stored record. Unknown ids are ignored.
    fn set_persistent_status(&self, download_id: &str, status: PersistentStatus)
        -> StoreResult<()>;

    /// Remove a record. Unknown ids are ignored.
    fn remove(&self, download_id: &str) -> StoreResult<()>;
}

/// Serialized form of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredUpdate {
    download_id: String,
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    release_type: String,
    #[serde(default)]
    timestamp: i64,
    download_url: String,
    #[serde(default)]
    file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_file: Option<PathBuf>,
    #[serde(default)]
    persistent_status: PersistentStatus,
}

impl From<&UpdateRecord> for StoredUpdate {
    fn from(record: &UpdateRecord) -> Self {
        Self {
            download_id: record.download_id.clone(),
            name: record.name.clone(),
            version: record.version.clone(),
            release_type: record.release_type.clone(),
            timestamp: record.timestamp,
            download_url: record.download_url.clone(),
            file_size: record.file_size,
            checksum: record.checksum.clone(),
            local_file: record.local_file.clone(),
            persistent_status: record.persistent_status,
        }
    }
}

impl From<StoredUpdate> for UpdateRecord {
    fn from(stored: StoredUpdate) -> Self {
        let mut record = UpdateRecord::new(stored.download_id, stored.name, stored.download_url)
            .with_version(stored.version)
            .with_release_type(stored.release_type)
            .with_timestamp(stored.timestamp)
            .with_file_size(stored.file_size)
            .with_persistent_status(stored.persistent_status);
        record.checksum = stored.checksum;
        record.local_file = stored.local_file;
        record
    }
}

/// Update metadata kept in a single JSON file.
///
/// The file is a JSON object keyed by download id. Every change rewrites it
/// through a temporary file and a rename.
pub struct JsonUpdateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredUpdate>>,
}

impl JsonUpdateStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| StoreError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| StoreError::ParseFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            debug!(path = %path.display(), "Update store not found, starting empty");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, StoredUpdate>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(entries).map_err(|e| StoreError::ParseFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content).map_err(|e| StoreError::WriteFailed {
            path: temp_path.clone(),
            source: e,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })
    }

    fn modify<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, StoredUpdate>) -> bool,
    {
        let mut entries = self.entries.lock();
        if !f(&mut entries) {
            return Ok(());
        }
        let result = self.save(&entries);
        if let Err(ref e) = result {
            warn!(error = %e, "Failed to persist update metadata");
        }
        result
    }
}

impl UpdateStore for JsonUpdateStore {
    fn load_all(&self) -> StoreResult<Vec<UpdateRecord>> {
        Ok(self
            .entries
            .lock()
            .values()
            .cloned()
            .map(UpdateRecord::from)
            .collect())
    }

    fn upsert(&self, record: &UpdateRecord) -> StoreResult<()> {
        let stored = StoredUpdate::from(record);
        self.modify(|entries| {
            entries.insert(stored.download_id.clone(), stored);
            true
        })
    }

    fn set_persistent_status(
        &self,
        download_id: &str,
        status: PersistentStatus,
    ) -> StoreResult<()> {
        self.modify(|entries| match entries.get_mut(download_id) {
            Some(entry) => {
                entry.persistent_status = status;
                true
            }
            None => false,
        })
    }

    fn remove(&self, download_id: &str) -> StoreResult<()> {
        self.modify(|entries| entries.remove(download_id).is_some())
    }
}

/// Update metadata kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryUpdateStore {
    entries: Mutex<BTreeMap<String, StoredUpdate>>,
}

impl MemoryUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistent status of a stored record.
    pub fn persistent_status(&self, download_id: &str) -> Option<PersistentStatus> {
        self.entries
            .lock()
            .get(download_id)
            .map(|e| e.persistent_status)
    }

    /// Whether a record with this id is stored.
    pub fn contains(&self, download_id: &str) -> bool {
        self.entries.lock().contains_key(download_id)
    }
}

impl UpdateStore for MemoryUpdateStore {
    fn load_all(&self) -> StoreResult<Vec<UpdateRecord>> {
        Ok(self
            .entries
            .lock()
            .values()
            .cloned()
            .map(UpdateRecord::from)
            .collect())
    }

    fn upsert(&self, record: &UpdateRecord) -> StoreResult<()> {
        let stored = StoredUpdate::from(record);
        self.entries.lock().insert(stored.download_id.clone(), stored);
        Ok(())
    }

    fn set_persistent_status(
        &self,
        download_id: &str,
        status: PersistentStatus,
    ) -> StoreResult<()> {
        if let Some(entry) = self.entries.lock().get_mut(download_id) {
            entry.persistent_status = status;
        }
        Ok(())
    }

    fn remove(&self, download_id: &str) -> StoreResult<()> {
        self.entries.lock().remove(download_id);
        Ok(())
    }
}
