//! Instance store
//!
//! The in-memory registry shared by every component. It is constructed once
//! at startup and handed to each component as an `Arc<InstanceStore>`.

mod instance;
mod table;

pub use instance::InstanceStore;
pub use table::{Entity, EntityGuard, Table};
