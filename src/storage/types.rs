//! Storage-level types shared by every [`LocalStore`](super::LocalStore) backend.

use serde_json::Value;
use thiserror::Error;

use crate::model::{QueueStatus, RecordSyncStatus, StoredRecord, SyncQueueItem};

/// Errors raised by a local store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The device ran out of space for the database.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The database cannot be opened or written at all.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Entity type is not registered with the store: {0}")]
    UnknownEntity(String),

    #[error("Invalid entity type name: {0}")]
    InvalidEntityType(String),

    #[error("Corrupt {what}: {reason}")]
    Corrupt { what: String, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(String),
}

impl StorageError {
    /// Whether the failure means the persistent backend is unusable, so
    /// callers should fall back to in-memory storage.
    #[must_use]
    pub const fn is_degradable(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_) | Self::Unavailable(_))
    }

    pub(crate) fn corrupt(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => Self::QuotaExceeded(err.to_string()),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied,
            ) => Self::Unavailable(err.to_string()),
            _ => Self::Sqlite(err.to_string()),
        }
    }
}

/// Criteria for listing records of one entity type.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub sync_status: Option<RecordSyncStatus>,
    /// Field equality constraints, by local field name.
    pub equals: Vec<(String, Value)>,
    /// Include local tombstones (hidden by default).
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

impl RecordFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Every row, tombstones included.
    #[must_use]
    pub fn everything() -> Self {
        Self {
            include_deleted: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RecordSyncStatus) -> Self {
        self.sync_status = Some(status);
        self
    }

    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.equals.push((field.into(), value));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored record passes every constraint except `limit`.
    #[must_use]
    pub fn matches(&self, stored: &StoredRecord) -> bool {
        if stored.deleted && !self.include_deleted {
            return false;
        }
        if self
            .sync_status
            .is_some_and(|status| status != stored.sync_status)
        {
            return false;
        }
        self.equals
            .iter()
            .all(|(field, value)| stored.record.field_matches(field, value))
    }
}

/// Criteria for listing queue items. Results are always in `seq` order.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

impl QueueFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Items targeting one record.
    #[must_use]
    pub fn for_record(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn status(mut self, status: QueueStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, item: &SyncQueueItem) -> bool {
        self.status.is_none_or(|s| s == item.status)
            && self
                .entity_type
                .as_deref()
                .is_none_or(|t| t == item.entity_type)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| id == item.entity_id)
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutRecord {
        entity_type: String,
        record: StoredRecord,
    },
    DeleteRecord {
        entity_type: String,
        id: String,
    },
    /// Insert or replace; a `seq` of 0 is assigned the next append position.
    PutQueueItem(SyncQueueItem),
    DeleteQueueItem(String),
    SetMeta {
        key: String,
        value: String,
    },
}

/// Writes applied atomically by [`LocalStore::commit`](super::LocalStore::commit).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn put_record(mut self, entity_type: &str, record: StoredRecord) -> Self {
        self.ops.push(WriteOp::PutRecord {
            entity_type: entity_type.to_string(),
            record,
        });
        self
    }

    #[must_use]
    pub fn delete_record(mut self, entity_type: &str, id: &str) -> Self {
        self.ops.push(WriteOp::DeleteRecord {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        });
        self
    }

    #[must_use]
    pub fn put_queue_item(mut self, item: SyncQueueItem) -> Self {
        self.ops.push(WriteOp::PutQueueItem(item));
        self
    }

    #[must_use]
    pub fn delete_queue_item(mut self, id: &str) -> Self {
        self.ops.push(WriteOp::DeleteQueueItem(id.to_string()));
        self
    }

    #[must_use]
    pub fn set_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::SetMeta {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    /// Append an op in place (for loops building a batch).
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operation, Record};
    use serde_json::{json, Map};

    #[test]
    fn test_record_filter_hides_tombstones() {
        let record = Record::new("a", 1, json!({"city": "Osaka"}).as_object().unwrap().clone());
        let live = StoredRecord::pending(record.clone());
        let dead = StoredRecord::tombstone(record);

        assert!(RecordFilter::all().matches(&live));
        assert!(!RecordFilter::all().matches(&dead));
        assert!(RecordFilter::everything().matches(&dead));
        assert!(RecordFilter::all().where_eq("city", json!("Osaka")).matches(&live));
        assert!(
            !RecordFilter::all()
                .with_status(RecordSyncStatus::Synced)
                .matches(&live)
        );
    }

    #[test]
    fn test_queue_filter_matches() {
        let item = SyncQueueItem::new("tours", Operation::Create, Record::new("t1", 1, Map::new()));
        assert!(QueueFilter::for_record("tours", "t1").matches(&item));
        assert!(!QueueFilter::for_record("tours", "t2").matches(&item));
        assert!(!QueueFilter::with_status(QueueStatus::Failed).matches(&item));
    }

    #[test]
    fn test_degradable_errors() {
        assert!(StorageError::QuotaExceeded("full".into()).is_degradable());
        assert!(StorageError::Unavailable("ro".into()).is_degradable());
        assert!(!StorageError::Sqlite("constraint".into()).is_degradable());
    }
}
