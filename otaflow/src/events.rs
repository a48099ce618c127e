//! Lifecycle events published by the controller.
//!
//! Events only carry the `download_id`. Subscribers re-read the current
//! [`UpdateRecord`](crate::update::UpdateRecord) snapshot from the controller
//! when they receive one, so a slow subscriber never acts on stale data.
//!
//! # Example
//!
//! ```ignore
//! let mut events = controller.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let Some(update) = controller.get_update(event.download_id()) {
//!         println!("{} is now {}", update.name, update.status);
//!     }
//! }
//! ```

use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A lifecycle event for one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The record's status (or another non-progress field) changed.
    StatusChanged(String),
    /// Download progress, eta or speed changed.
    DownloadProgress(String),
    /// Installation progress changed.
    InstallProgress(String),
    /// The record was removed from the registry.
    Removed(String),
}

impl UpdateEvent {
    /// The id of the update this event refers to.
    pub fn download_id(&self) -> &str {
        match self {
            Self::StatusChanged(id)
            | Self::DownloadProgress(id)
            | Self::InstallProgress(id)
            | Self::Removed(id) => id,
        }
    }

    /// Short name of the event kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status",
            Self::DownloadProgress(_) => "download_progress",
            Self::InstallProgress(_) => "install_progress",
            Self::Removed(_) => "removed",
        }
    }
}

/// In-process publish/subscribe bus for [`UpdateEvent`]s.
///
/// Cheap to clone; all clones publish to the same subscribers. Publishing
/// never blocks, and lagging subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UpdateEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: UpdateEvent) {
        trace!(kind = event.kind(), download_id = event.download_id(), "Publishing event");
        let _ = self.sender.send(event);
    }

    pub(crate) fn status_changed(&self, download_id: &str) {
        self.publish(UpdateEvent::StatusChanged(download_id.to_string()));
    }

    pub(crate) fn download_progress(&self, download_id: &str) {
        self.publish(UpdateEvent::DownloadProgress(download_id.to_string()));
    }

    pub(crate) fn install_progress(&self, download_id: &str) {
        self.publish(UpdateEvent::InstallProgress(download_id.to_string()));
    }

    pub(crate) fn removed(&self, download_id: &str) {
        self.publish(UpdateEvent::Removed(download_id.to_string()));
    }
}
