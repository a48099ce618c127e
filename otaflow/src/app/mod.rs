//! Application bootstrap and lifecycle management.
//!
//! [`UpdaterApp`] builds the one owning context of a process: stores,
//! controller and installers, wired from a [`UpdaterConfig`] and the host's
//! [`Collaborators`].
//!
//! # Example
//!
//! ```ignore
//! use otaflow::app::{Collaborators, UpdaterApp};
//! use otaflow::config::{DeviceProfile, UpdaterConfig};
//!
//! let config = UpdaterConfig::new(DeviceProfile::new(build_timestamp).with_dual_partition(true));
//! let collaborators = Collaborators::new(transports, verifier, applier, engine);
//! let app = UpdaterApp::start(config, collaborators)?;
//!
//! let controller = app.controller();
//! controller.add_update(update, true);
//! controller.start_download(&update_id);
//! ```
//!
//! [`UpdaterConfig`]: crate::config::UpdaterConfig

mod bootstrap;
mod cleanup;

pub use bootstrap::{Collaborators, UpdaterApp};
pub use cleanup::CleanupReport;
