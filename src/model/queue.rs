//! Sync queue model.
//!
//! Queue items are the durable log of local mutations awaiting delivery to
//! the remote datastore. They are appended by the offline manager and only
//! ever transitioned by the sync engine.

use serde::{Deserialize, Serialize};

use super::record::Record;

/// The mutation a queue item replays against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Unknown operation: {s}")),
        }
    }
}

/// Lifecycle state of a queue item.
///
/// `pending → processing → completed | pending (retry) | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown queue status: {s}")),
        }
    }
}

/// A pending or historical synchronization task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique identifier (UUID).
    pub id: String,

    /// Monotonic append position, assigned by the store (0 = not yet assigned).
    pub seq: i64,

    /// Local table this item targets.
    pub entity_type: String,

    /// Id of the record the mutation applies to.
    pub entity_id: String,

    pub operation: Operation,

    /// Full record snapshot at enqueue time (local naming convention).
    pub payload: Record,

    pub status: QueueStatus,

    /// Failed delivery attempts so far.
    pub retry_count: u32,

    pub last_error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last status change (Unix milliseconds)
    pub updated_at: i64,

    /// Earliest time the engine may attempt delivery again (Unix milliseconds).
    pub next_attempt_at: i64,
}

impl SyncQueueItem {
    /// Create a new pending item for `operation` on `payload`.
    #[must_use]
    pub fn new(entity_type: &str, operation: Operation, payload: Record) -> Self {
        let now = super::now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            entity_type: entity_type.to_string(),
            entity_id: payload.id.clone(),
            operation,
            payload,
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
        }
    }

    /// Key used to keep per-record delivery order.
    #[must_use]
    pub fn record_key(&self) -> (String, String) {
        (self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether the item is still waiting for delivery (pending or in flight).
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, QueueStatus::Pending | QueueStatus::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("done".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_new_item_is_pending_and_targets_payload() {
        let record = Record::new("tour-1", 5, Map::new());
        let item = SyncQueueItem::new("tours", Operation::Create, record);
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.entity_id, "tour-1");
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.seq, 0);
        assert!(item.is_outstanding());
    }
}
