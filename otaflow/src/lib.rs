//! otaflow - Over-the-air update lifecycle for devices
//!
//! This library downloads update packages, verifies them and installs them,
//! either as a whole package through a trusted apply primitive or by
//! streaming the payload onto the inactive partition of a dual-partition
//! device. Installs in flight survive process restarts.
//!
//! Start with [`app::UpdaterApp`], which wires the [`controller::Controller`]
//! and both installers from an [`config::UpdaterConfig`] and the host's
//! collaborators, then subscribe to [`events::UpdateEvent`]s.

pub mod app;
pub mod archive;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod events;
pub mod install;
pub mod logging;
pub mod store;
pub mod update;
pub mod verify;
pub mod wakelock;

pub use app::{Collaborators, UpdaterApp};
pub use controller::{BootReport, Controller};
pub use error::{UpdaterError, UpdaterResult};
pub use events::{EventBus, UpdateEvent};
pub use update::{PersistentStatus, UpdateRecord, UpdateStatus};
