//! Durable state: settings, preferences, install recovery ids and update
//! metadata.

mod error;
mod preferences;
mod recovery;
mod settings;
mod updates;

pub use error::{StoreError, StoreResult};
pub use preferences::{keys, InstallBookkeeping, Preferences};
pub use recovery::InstallRecovery;
pub use settings::{IniSettingsStore, MemorySettingsStore, SettingEdit, SettingsStore};
pub use updates::{JsonUpdateStore, MemoryUpdateStore, UpdateStore};
