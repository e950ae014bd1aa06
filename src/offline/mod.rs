//! Offline-first CRUD surface.
//!
//! [`OfflineManager`] is the only component business code writes through.

pub mod manager;

pub use manager::{OfflineManager, CREATED_AT_FIELD};
