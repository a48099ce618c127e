//! Update records and their status model.

mod record;
mod status;

pub use record::UpdateRecord;
pub use status::{PersistentStatus, UpdateStatus};
