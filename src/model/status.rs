//! Sync status snapshot surfaced to the UI and the CLI.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Items not yet delivered (pending or in flight).
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.pending + self.processing
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Kind of problem recorded against an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncIssueKind {
    /// Delivery exhausted its retries.
    Failed,
    /// Local and remote versions diverged and one side was overridden.
    Conflict,
}

/// A user-visible sync problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub kind: SyncIssueKind,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of overall synchronization state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// A sync pass is currently running.
    pub is_syncing: bool,

    /// Local store has fallen back to memory; changes will not survive a restart.
    pub degraded: bool,

    /// Queue items not yet delivered (pending + processing).
    pub pending_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,

    /// Outstanding item count per entity type.
    pub pending_by_entity: BTreeMap<String, usize>,

    /// End of the last successful sync pass.
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Failed items and recent conflicts.
    pub errors: Vec<SyncIssue>,
}

/// Compact indicator state for a status badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncIndicator {
    Offline,
    Syncing,
    Error,
    Pending,
    Synced,
}

impl SyncIndicator {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }
}

impl std::fmt::Display for SyncIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncStatus {
    /// Collapse the snapshot into a single badge state.
    ///
    /// Precedence: offline, syncing, failed items, outstanding items, synced.
    #[must_use]
    pub fn indicator(&self, is_online: bool) -> SyncIndicator {
        if !is_online {
            SyncIndicator::Offline
        } else if self.is_syncing {
            SyncIndicator::Syncing
        } else if self.failed_count > 0 {
            SyncIndicator::Error
        } else if self.pending_count > 0 {
            SyncIndicator::Pending
        } else {
            SyncIndicator::Synced
        }
    }

    /// Whether every local change has been confirmed by the remote store.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending_count == 0 && !self.is_syncing
    }
}
