//! Transport callbacks of one download session.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{debug, error, warn};

use super::ControllerInner;
use crate::download::{percent, DownloadListener, ResponseHeaders, TransferProgress, TransportError};
use crate::update::{PersistentStatus, UpdateStatus};

/// Listener handed to a transport.
///
/// Tagged with the session it was created for, so callbacks arriving after
/// the download was paused or restarted are dropped.
pub(super) struct SessionListener {
    controller: Weak<ControllerInner>,
    download_id: String,
    session: u64,
}

impl SessionListener {
    pub(super) fn new(controller: Weak<ControllerInner>, download_id: String, session: u64) -> Self {
        Self {
            controller,
            download_id,
            session,
        }
    }
}

impl DownloadListener for SessionListener {
    fn on_headers(&self, response: &ResponseHeaders) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_headers(&self.download_id, self.session, response);
        }
    }

    fn on_progress(&self, progress: TransferProgress) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_progress(&self.download_id, self.session, progress);
        }
    }

    fn on_success(&self, destination: &Path) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_success(&self.download_id, self.session, destination);
        }
    }

    fn on_failure(&self, error: &TransportError) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_failure(&self.download_id, self.session, error);
        }
    }
}

impl ControllerInner {
    fn on_headers(&self, download_id: &str, session: u64, response: &ResponseHeaders) {
        debug!(download_id, status = response.status, url = %response.url, "Download response");
        let content_length = response.content_length();
        if content_length.is_none() && response.get("content-length").is_some() {
            error!(download_id, "Could not get content-length");
        }

        let snapshot = {
            let mut state = self.registry.lock();
            let Some(entry) = state.current_session(download_id, session) else {
                return;
            };
            let record = &mut entry.record;
            if let Some(len) = content_length {
                record.file_size = record.file_size.max(len);
            }
            record.status = UpdateStatus::Downloading;
            record.persistent_status = PersistentStatus::Incomplete;
            self.registry.events().status_changed(download_id);
            record.clone()
        };

        if let Err(e) = self.registry.store().upsert(&snapshot) {
            warn!(download_id, error = %e, "Could not persist update");
        }
    }

    fn on_progress(&self, download_id: &str, session: u64, progress: TransferProgress) {
        let mut state = self.registry.lock();
        let Some(entry) = state.current_session(download_id, session) else {
            return;
        };

        let total = progress
            .content_length
            .filter(|&len| len > 0)
            .unwrap_or(entry.record.file_size);
        if total == 0 {
            return;
        }

        let pct = percent(progress.bytes_read, total);
        if entry.throttle.should_emit(pct, Instant::now()) {
            let record = &mut entry.record;
            record.progress = pct;
            record.eta = progress.eta;
            record.speed = progress.speed;
            self.registry.events().download_progress(download_id);
        }
    }

    fn on_success(self: &Arc<Self>, download_id: &str, session: u64, destination: &Path) {
        debug!(download_id, path = %destination.display(), "Download complete");
        {
            let mut state = self.registry.lock();
            let Some(entry) = state.current_session(download_id, session) else {
                return;
            };
            entry.record.status = UpdateStatus::Verifying;
            self.registry.detach(&mut state, download_id);
            state.verifying.insert(download_id.to_string());
            self.registry.events().status_changed(download_id);
        }
        self.spawn_verification(download_id);
    }

    fn on_failure(&self, download_id: &str, session: u64, error: &TransportError) {
        if error.is_cancelled() {
            debug!(download_id, "Download cancelled");
            return;
        }
        error!(download_id, error = %error, "Download failed");

        let mut state = self.registry.lock();
        if state.current_session(download_id, session).is_none() {
            return;
        }
        self.registry.detach(&mut state, download_id);
        if let Some(entry) = state.entries.get_mut(download_id) {
            entry.record.status = UpdateStatus::PausedError;
            self.registry.events().status_changed(download_id);
        }
    }
}
