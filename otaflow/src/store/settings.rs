//! Key-value settings storage.
//!
//! Preferences and crash-recovery ids live in a small string key-value store.
//! Writes are last-writer-wins per key; [`SettingsStore::apply`] groups several
//! edits so they land on disk together.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};

/// Section of the INI file holding all updater settings.
const SECTION: &str = "updater";

/// A single edit: `Some(value)` stores, `None` removes the key.
pub type SettingEdit<'a> = (&'a str, Option<String>);

/// Durable string key-value store.
pub trait SettingsStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Apply a batch of edits atomically.
    fn apply(&self, edits: &[SettingEdit<'_>]) -> StoreResult<()>;

    /// Store a single value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.apply(&[(key, Some(value.to_string()))])
    }

    /// Remove a single value.
    fn remove(&self, key: &str) -> StoreResult<()> {
        self.apply(&[(key, None)])
    }
}

/// Settings persisted to an INI file.
///
/// The whole file is rewritten on every change, to a temporary file first and
/// then renamed over the original.
pub struct IniSettingsStore {
    path: PathBuf,
    ini: Mutex<Ini>,
}

impl IniSettingsStore {
    /// Open (or lazily create) the settings file at `path`.
    ///
    /// A missing file is treated as empty. An unreadable or malformed file
    /// is an error, so a corrupt state is never silently overwritten.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let ini = if path.exists() {
            Ini::load_from_file(&path).map_err(|e| match e {
                ini::Error::Io(source) => StoreError::ReadFailed {
                    path: path.clone(),
                    source,
                },
                ini::Error::Parse(parse) => StoreError::ParseFailed {
                    path: path.clone(),
                    reason: parse.to_string(),
                },
            })?
        } else {
            debug!(path = %path.display(), "Settings file not found, starting empty");
            Ini::new()
        };

        Ok(Self {
            path,
            ini: Mutex::new(ini),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, ini: &Ini) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let temp_path = self.path.with_extension("tmp");
        ini.write_to_file(&temp_path)
            .map_err(|e| StoreError::WriteFailed {
                path: temp_path.clone(),
                source: e,
            })?;
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl SettingsStore for IniSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.ini
            .lock()
            .section(Some(SECTION))
            .and_then(|props| props.get(key))
            .map(str::to_string)
    }

    fn apply(&self, edits: &[SettingEdit<'_>]) -> StoreResult<()> {
        let mut ini = self.ini.lock();
        for (key, value) in edits {
            match value {
                Some(value) => {
                    ini.with_section(Some(SECTION)).set(*key, value.as_str());
                }
                None => {
                    ini.delete_from(Some(SECTION), key);
                }
            }
        }
        let result = self.save(&ini);
        if let Err(ref e) = result {
            warn!(error = %e, "Failed to persist settings");
        }
        result
    }
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn apply(&self, edits: &[SettingEdit<'_>]) -> StoreResult<()> {
        let mut values = self.values.lock();
        for (key, value) in edits {
            match value {
                Some(value) => {
                    values.insert(key.to_string(), value.clone());
                }
                None => {
                    values.remove(*key);
                }
            }
        }
        Ok(())
    }
}
