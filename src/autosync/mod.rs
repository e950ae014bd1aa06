//! Auto-sync orchestration.
//!
//! Wires connectivity, a timer and local change notifications to the
//! [`SyncEngine`](crate::sync::SyncEngine) so passes run without the host
//! asking for them:
//!
//! - [`Connectivity`] - online/offline state published over a watch channel
//! - [`AutoSync`] / [`AutoSyncHandle`] - the background task and its controls

mod connectivity;
mod orchestrator;

pub use connectivity::Connectivity;
pub use orchestrator::{AutoSync, AutoSyncHandle, AutoSyncOptions};
