//! In-memory [`LocalStore`] backend.
//!
//! Used when the persistent database is unavailable (degraded mode) and in
//! tests. Contents are lost when the process exits.

use std::collections::BTreeMap;

use super::types::{QueueFilter, RecordFilter, StorageError, WriteBatch, WriteOp};
use super::LocalStore;
use crate::model::{QueueCounts, QueueStatus, StoredRecord, SyncQueueItem};

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, BTreeMap<String, StoredRecord>>,
    queue: BTreeMap<String, SyncQueueItem>,
    meta: BTreeMap<String, String>,
    next_seq: i64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, entity_type: &str) -> Result<&BTreeMap<String, StoredRecord>> {
        self.records
            .get(entity_type)
            .ok_or_else(|| StorageError::UnknownEntity(entity_type.to_string()))
    }

    fn check(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::PutRecord { entity_type, .. } | WriteOp::DeleteRecord { entity_type, .. } => {
                self.table(entity_type).map(|_| ())
            }
            WriteOp::PutQueueItem(_) | WriteOp::DeleteQueueItem(_) | WriteOp::SetMeta { .. } => {
                Ok(())
            }
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutRecord {
                entity_type,
                record,
            } => {
                if let Some(table) = self.records.get_mut(&entity_type) {
                    table.insert(record.record.id.clone(), record);
                }
            }
            WriteOp::DeleteRecord { entity_type, id } => {
                if let Some(table) = self.records.get_mut(&entity_type) {
                    table.remove(&id);
                }
            }
            WriteOp::PutQueueItem(mut item) => {
                if let Some(existing) = self.queue.get(&item.id) {
                    item.seq = existing.seq;
                } else if item.seq <= 0 {
                    self.next_seq += 1;
                    item.seq = self.next_seq;
                } else {
                    self.next_seq = self.next_seq.max(item.seq);
                }
                self.queue.insert(item.id.clone(), item);
            }
            WriteOp::DeleteQueueItem(id) => {
                self.queue.remove(&id);
            }
            WriteOp::SetMeta { key, value } => {
                self.meta.insert(key, value);
            }
        }
    }
}

impl LocalStore for MemoryStore {
    fn ensure_entity(&mut self, entity_type: &str) -> Result<()> {
        super::schema::record_table(entity_type)?;
        self.records.entry(entity_type.to_string()).or_default();
        Ok(())
    }

    fn entity_types(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    fn get_record(&self, entity_type: &str, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.table(entity_type)?.get(id).cloned())
    }

    fn list_records(&self, entity_type: &str, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        let mut out: Vec<StoredRecord> = self
            .table(entity_type)?
            .values()
            .filter(|stored| filter.matches(stored))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.record
                .updated_at
                .cmp(&a.record.updated_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn get_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        Ok(self.queue.get(id).cloned())
    }

    fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<SyncQueueItem>> {
        let mut out: Vec<SyncQueueItem> = self
            .queue
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        out.sort_by_key(|item| item.seq);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn queue_counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for item in self.queue.values() {
            match item.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Completed => counts.completed += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    fn pending_by_entity(&self) -> Result<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        for item in self.queue.values().filter(|item| item.is_outstanding()) {
            *out.entry(item.entity_type.clone()).or_insert(0) += 1;
        }
        Ok(out)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.get(key).cloned())
    }

    fn all_meta(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.meta.clone())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        for op in batch.ops() {
            self.check(op)?;
        }
        for op in batch.into_ops() {
            self.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operation, Record};
    use serde_json::Map;

    #[test]
    fn test_queue_order_and_upsert() {
        let mut store = MemoryStore::new();
        store.ensure_entity("orders").unwrap();

        let a = SyncQueueItem::new("orders", Operation::Create, Record::new("a", 1, Map::new()));
        let b = SyncQueueItem::new("orders", Operation::Create, Record::new("b", 1, Map::new()));
        store.put_queue_item(a.clone()).unwrap();
        store.put_queue_item(b).unwrap();

        let mut again = a;
        again.status = QueueStatus::Failed;
        store.put_queue_item(again).unwrap();

        let items = store.list_queue(&QueueFilter::all()).unwrap();
        assert_eq!(items[0].entity_id, "a");
        assert_eq!(items[0].status, QueueStatus::Failed);
        assert_eq!(items[1].entity_id, "b");
        assert_eq!(store.queue_counts().unwrap().failed, 1);
    }

    #[test]
    fn test_commit_validates_before_applying() {
        let mut store = MemoryStore::new();
        store.ensure_entity("orders").unwrap();
        let batch = WriteBatch::new()
            .put_record("orders", StoredRecord::pending(Record::new("a", 1, Map::new())))
            .put_record("rockets", StoredRecord::pending(Record::new("b", 1, Map::new())));
        assert!(store.commit(batch).is_err());
        assert!(store.get_record("orders", "a").unwrap().is_none());
    }
}
