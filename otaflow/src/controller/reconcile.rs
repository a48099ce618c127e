//! Status reconciliation for records entering the registry.
//!
//! The ephemeral status is not persisted, so a record restored from storage
//! (or re-announced by the catalog) gets a status derived from its persistent
//! status and the artifact on disk.

use crate::update::{PersistentStatus, UpdateRecord, UpdateStatus};

/// Derive the status and progress of `record`.
///
/// Returns `false` when the record claims a local artifact that is gone;
/// such a record is reset to `Unknown` and is not worth keeping unless the
/// catalog still lists it.
pub(crate) fn reconcile_status(record: &mut UpdateRecord, build_timestamp: i64) -> bool {
    match record.persistent_status {
        PersistentStatus::Verified | PersistentStatus::Incomplete => {
            let Some(len) = record.local_file_len() else {
                record.status = UpdateStatus::Unknown;
                return false;
            };
            if record.file_size > 0 {
                record.status = if record.timestamp <= build_timestamp {
                    UpdateStatus::Installed
                } else {
                    UpdateStatus::Paused
                };
                record.progress = rounded_percent(len, record.file_size);
            }
            true
        }
        PersistentStatus::Unknown => true,
    }
}

fn rounded_percent(done: u64, total: u64) -> u8 {
    let pct = (done as f64 * 100.0 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}
