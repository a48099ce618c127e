//! Verification worker for completed downloads.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use super::ControllerInner;
use crate::update::{PersistentStatus, UpdateRecord, UpdateStatus};

impl ControllerInner {
    /// Verify `download_id` on a worker thread.
    ///
    /// The id must already be in the verifying set; the worker removes it.
    pub(super) fn spawn_verification(self: &Arc<Self>, download_id: &str) {
        let worker = Arc::clone(self);
        let id = download_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("verify-{download_id}"))
            .spawn(move || worker.verify(&id));

        if let Err(e) = spawned {
            warn!(download_id, error = %e, "Failed to spawn verification worker, verifying inline");
            self.verify(download_id);
        }
    }

    fn verify(&self, download_id: &str) {
        let Some(record) = self.registry.snapshot(download_id) else {
            self.registry.lock().verifying.remove(download_id);
            return;
        };

        let verified = match record.local_file.as_deref() {
            Some(path) if path.exists() => self.verify_package(path, &record),
            _ => {
                debug!(download_id, "Artifact vanished before verification");
                false
            }
        };

        let store = self.registry.store();
        if verified {
            if let Some(path) = record.local_file.as_deref() {
                make_world_readable(path);
            }
            if let Err(e) = store.set_persistent_status(download_id, PersistentStatus::Verified) {
                warn!(download_id, error = %e, "Could not persist verified status");
            }
        } else if let Err(e) = store.remove(download_id) {
            warn!(download_id, error = %e, "Could not remove stored update");
        }

        let mut state = self.registry.lock();
        state.verifying.remove(download_id);
        if let Some(entry) = state.entries.get_mut(download_id) {
            let record = &mut entry.record;
            if verified {
                record.persistent_status = PersistentStatus::Verified;
                record.status = UpdateStatus::Verified;
            } else {
                record.persistent_status = PersistentStatus::Unknown;
                record.progress = 0;
                record.status = UpdateStatus::VerificationFailed;
            }
            self.registry.events().status_changed(download_id);
        }
    }

    /// Run the verifier, deleting the artifact when it is rejected.
    fn verify_package(&self, path: &Path, record: &UpdateRecord) -> bool {
        let download_id = record.download_id.as_str();
        if !self.prefs.verify_mode() {
            info!(download_id, "Verification disabled, skipping");
            return true;
        }

        match self.verifier.verify(path, record) {
            Ok(()) => {
                info!(download_id, "Verification successful");
                true
            }
            Err(e) => {
                error!(download_id, error = %e, "Verification failed");
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Could not delete rejected artifact");
                }
                false
            }
        }
    }
}

#[cfg(unix)]
fn make_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let result = fs::metadata(path).and_then(|meta| {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o444);
        fs::set_permissions(path, perms)
    });
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Could not make artifact readable");
    }
}

#[cfg(not(unix))]
fn make_world_readable(_path: &Path) {}
