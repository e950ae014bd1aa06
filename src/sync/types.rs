//! Type definitions for the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures talking to the remote datastore.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached at all (DNS, refused, offline).
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// A single request took too long.
    #[error("Remote request timed out: {0}")]
    Timeout(String),

    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Record already exists remotely")]
    AlreadyExists,

    #[error("Record not found remotely")]
    NotFound,

    #[error("Invalid remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether the failure is about connectivity rather than the request,
    /// so continuing the pass would only fail the same way.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Position in a collection's change feed, assigned by the remote when it
/// stores a write. Strictly increasing per collection.
pub type ChangeSeq = i64;

/// One change reported by `list_since`.
///
/// `seq` is the remote's own ordering of writes and is unrelated to the
/// record's `updated_at`, which the writing client stamped. Pull cursors
/// only ever advance on `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteChange {
    /// A created or updated row, in the remote naming convention.
    Upsert { seq: ChangeSeq, row: Map<String, Value> },
    /// A row deleted remotely.
    Deleted {
        seq: ChangeSeq,
        id: String,
        #[serde(default)]
        deleted_at: Option<DateTime<Utc>>,
    },
}

impl RemoteChange {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Upsert { row, .. } => row.get("id").and_then(Value::as_str),
            Self::Deleted { id, .. } => Some(id),
        }
    }

    /// Feed position, used to advance the pull cursor.
    #[must_use]
    pub const fn seq(&self) -> ChangeSeq {
        match self {
            Self::Upsert { seq, .. } | Self::Deleted { seq, .. } => *seq,
        }
    }
}

/// Phase of a running pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    PullingQueue,
    Pushing,
    PullingRemote,
    Reconciling,
}

impl SyncPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PullingQueue => "pulling_queue",
            Self::Pushing => "pushing",
            Self::PullingRemote => "pulling_remote",
            Self::Reconciling => "reconciling",
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Queue items sent to the remote.
    pub pushed: usize,
    /// Items confirmed by the remote.
    pub completed: usize,
    /// Items that failed and will be retried after a backoff.
    pub retried: usize,
    /// Items that exhausted their retries.
    pub failed: usize,
    /// Items returned to pending untouched because the pass stopped early.
    pub deferred: usize,
    /// Stale `processing` items recovered at the start of the pass.
    pub recovered: usize,
    /// Remote changes written locally.
    pub pulled: usize,
    /// Remote changes identical to the local copy.
    pub unchanged: usize,
    pub conflicts: usize,
    /// Completed items removed after the retention window.
    pub pruned: usize,
    /// The pass stopped early on a connectivity failure.
    pub interrupted: bool,
    pub error: Option<String>,
}

impl PassReport {
    /// One-line summary for logs and the CLI.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = format!(
            "pushed {} (completed {}, retrying {}, failed {}), pulled {}, conflicts {}",
            self.pushed, self.completed, self.retried, self.failed, self.pulled, self.conflicts
        );
        if self.interrupted {
            s.push_str(", interrupted");
        }
        s
    }
}
