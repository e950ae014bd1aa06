//! Data models for the offline sync layer.
//!
//! This module contains the domain models shared by every component:
//! - Record / StoredRecord
//! - SyncQueueItem (Operation, QueueStatus)
//! - SyncStatus (QueueCounts, SyncIssue, SyncIndicator)

pub mod queue;
pub mod record;
pub mod status;

pub use queue::{Operation, QueueStatus, SyncQueueItem};
pub use record::{Record, RecordSyncStatus, StoredRecord};
pub use status::{QueueCounts, SyncIndicator, SyncIssue, SyncIssueKind, SyncStatus};

/// Current time as Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
