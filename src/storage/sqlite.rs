//! SQLite storage implementation.
//!
//! This module provides the persistent [`LocalStore`] backend. Every write
//! goes through [`SqliteStore::mutate`], which wraps the work in an
//! IMMEDIATE transaction so a record write and its queue append land together.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, trace};

use super::schema::{apply_schema, ensure_entity_table, existing_entity_types, record_table};
use super::types::{QueueFilter, RecordFilter, StorageError, WriteBatch, WriteOp};
use super::LocalStore;
use crate::model::{
    now_millis, QueueCounts, QueueStatus, Record, RecordSyncStatus, StoredRecord, SyncQueueItem,
};

type Result<T> = std::result::Result<T, StorageError>;

const QUEUE_COLUMNS: &str = "id, seq, entity_type, entity_id, operation, payload, status,
     retry_count, last_error, created_at, updated_at, next_attempt_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    /// Entity types whose record table exists.
    tables: HashSet<String>,
}

impl SqliteStore {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        let tables = existing_entity_types(&conn)?.into_iter().collect();
        Ok(Self { conn, tables })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a write inside an IMMEDIATE transaction.
    ///
    /// The transaction is rolled back if the closure returns an error.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or any SQLite failure.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let result = f(&tx)?;

        tx.commit()?;
        trace!(op, "committed");

        Ok(result)
    }

    fn table(&self, entity_type: &str) -> Result<String> {
        if !self.tables.contains(entity_type) {
            return Err(StorageError::UnknownEntity(entity_type.to_string()));
        }
        record_table(entity_type)
    }
}

fn map_record_row(entity_type: &str, row: &Row) -> rusqlite::Result<RawRecordRow> {
    Ok(RawRecordRow {
        entity_type: entity_type.to_string(),
        id: row.get(0)?,
        data: row.get(1)?,
        updated_at: row.get(2)?,
        sync_status: row.get(3)?,
        deleted: row.get::<_, i64>(4)? != 0,
    })
}

/// Undecoded record row; JSON decoding happens outside the rusqlite closure.
struct RawRecordRow {
    entity_type: String,
    id: String,
    data: String,
    updated_at: i64,
    sync_status: String,
    deleted: bool,
}

impl RawRecordRow {
    fn decode(self) -> Result<StoredRecord> {
        let what = format!("{}/{}", self.entity_type, self.id);
        let fields = serde_json::from_str(&self.data).map_err(|e| StorageError::corrupt(&what, e))?;
        let sync_status = self
            .sync_status
            .parse::<RecordSyncStatus>()
            .map_err(|e| StorageError::corrupt(&what, e))?;
        Ok(StoredRecord {
            record: Record::new(self.id, self.updated_at, fields),
            sync_status,
            deleted: self.deleted,
        })
    }
}

/// Undecoded queue row.
struct RawQueueRow {
    id: String,
    seq: i64,
    entity_type: String,
    entity_id: String,
    operation: String,
    payload: String,
    status: String,
    retry_count: i64,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
    next_attempt_at: i64,
}

fn map_queue_row(row: &Row) -> rusqlite::Result<RawQueueRow> {
    Ok(RawQueueRow {
        id: row.get(0)?,
        seq: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        operation: row.get(4)?,
        payload: row.get(5)?,
        status: row.get(6)?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        next_attempt_at: row.get(11)?,
    })
}

impl RawQueueRow {
    fn decode(self) -> Result<SyncQueueItem> {
        let what = format!("queue item {}", self.id);
        Ok(SyncQueueItem {
            operation: self
                .operation
                .parse()
                .map_err(|e: String| StorageError::corrupt(&what, e))?,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| StorageError::corrupt(&what, e))?,
            status: self
                .status
                .parse()
                .map_err(|e: String| StorageError::corrupt(&what, e))?,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|e| StorageError::corrupt(&what, e))?,
            id: self.id,
            seq: self.seq,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            next_attempt_at: self.next_attempt_at,
        })
    }
}

fn apply_op(tx: &Transaction, tables: &HashSet<String>, op: &WriteOp) -> Result<()> {
    let table_for = |entity_type: &str| -> Result<String> {
        if tables.contains(entity_type) {
            record_table(entity_type)
        } else {
            Err(StorageError::UnknownEntity(entity_type.to_string()))
        }
    };

    match op {
        WriteOp::PutRecord {
            entity_type,
            record,
        } => {
            let table = table_for(entity_type)?;
            let data = serde_json::to_string(&record.record.fields)
                .map_err(|e| StorageError::corrupt(format!("{entity_type}/{}", record.record.id), e))?;
            tx.execute(
                &format!(
                    r#"INSERT INTO "{table}" (id, data, updated_at, sync_status, deleted)
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(id) DO UPDATE SET
                           data = excluded.data,
                           updated_at = excluded.updated_at,
                           sync_status = excluded.sync_status,
                           deleted = excluded.deleted"#
                ),
                params![
                    record.record.id,
                    data,
                    record.record.updated_at,
                    record.sync_status.as_str(),
                    i64::from(record.deleted),
                ],
            )?;
        }
        WriteOp::DeleteRecord { entity_type, id } => {
            let table = table_for(entity_type)?;
            tx.execute(&format!(r#"DELETE FROM "{table}" WHERE id = ?1"#), [id])?;
        }
        WriteOp::PutQueueItem(item) => {
            let payload = serde_json::to_string(&item.payload)
                .map_err(|e| StorageError::corrupt(format!("queue item {}", item.id), e))?;
            let seq = if item.seq > 0 {
                item.seq
            } else {
                tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue", [], |row| {
                    row.get(0)
                })?
            };
            tx.execute(
                "INSERT INTO sync_queue (id, seq, entity_type, entity_id, operation, payload,
                                         status, retry_count, last_error, created_at,
                                         updated_at, next_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     payload = excluded.payload,
                     status = excluded.status,
                     retry_count = excluded.retry_count,
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at,
                     next_attempt_at = excluded.next_attempt_at",
                params![
                    item.id,
                    seq,
                    item.entity_type,
                    item.entity_id,
                    item.operation.as_str(),
                    payload,
                    item.status.as_str(),
                    i64::from(item.retry_count),
                    item.last_error,
                    item.created_at,
                    item.updated_at,
                    item.next_attempt_at,
                ],
            )?;
        }
        WriteOp::DeleteQueueItem(id) => {
            tx.execute("DELETE FROM sync_queue WHERE id = ?1", [id])?;
        }
        WriteOp::SetMeta { key, value } => {
            tx.execute(
                "INSERT INTO sync_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_millis()],
            )?;
        }
    }
    Ok(())
}

impl LocalStore for SqliteStore {
    fn ensure_entity(&mut self, entity_type: &str) -> Result<()> {
        if self.tables.contains(entity_type) {
            return Ok(());
        }
        ensure_entity_table(&self.conn, entity_type)?;
        debug!(entity_type, "Created record table");
        self.tables.insert(entity_type.to_string());
        Ok(())
    }

    fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.tables.iter().cloned().collect();
        types.sort();
        types
    }

    fn get_record(&self, entity_type: &str, id: &str) -> Result<Option<StoredRecord>> {
        let table = self.table(entity_type)?;
        let raw = self
            .conn
            .query_row(
                &format!(
                    r#"SELECT id, data, updated_at, sync_status, deleted FROM "{table}" WHERE id = ?1"#
                ),
                [id],
                |row| map_record_row(entity_type, row),
            )
            .optional()?;
        raw.map(RawRecordRow::decode).transpose()
    }

    fn list_records(&self, entity_type: &str, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        let table = self.table(entity_type)?;

        let mut sql = format!(
            r#"SELECT id, data, updated_at, sync_status, deleted FROM "{table}" WHERE 1=1"#
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if !filter.include_deleted {
            sql.push_str(" AND deleted = 0");
        }
        if let Some(status) = filter.sync_status {
            sql.push_str(" AND sync_status = ?");
            params.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY updated_at DESC, id");
        // Field equality is checked after decoding, so only push LIMIT down without it.
        if let (Some(limit), true) = (filter.limit, filter.equals.is_empty()) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(std::convert::AsRef::as_ref)),
                |row| map_record_row(entity_type, row),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::new();
        for raw in raws {
            let stored = raw.decode()?;
            if filter.matches(&stored) {
                out.push(stored);
                if filter.limit.is_some_and(|limit| out.len() >= limit) {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn get_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1"),
                [id],
                map_queue_row,
            )
            .optional()?;
        raw.map(RawQueueRow::decode).transpose()
    }

    fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<SyncQueueItem>> {
        let mut sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(entity_type) = &filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            params.push(Box::new(entity_type.clone()));
        }
        if let Some(entity_id) = &filter.entity_id {
            sql.push_str(" AND entity_id = ?");
            params.push(Box::new(entity_id.clone()));
        }
        sql.push_str(" ORDER BY seq ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(std::convert::AsRef::as_ref)),
                map_queue_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawQueueRow::decode).collect()
    }

    fn queue_counts(&self) -> Result<QueueCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            let count = usize::try_from(count).unwrap_or(0);
            match status.parse::<QueueStatus>() {
                Ok(QueueStatus::Pending) => counts.pending = count,
                Ok(QueueStatus::Processing) => counts.processing = count,
                Ok(QueueStatus::Completed) => counts.completed = count,
                Ok(QueueStatus::Failed) => counts.failed = count,
                Err(e) => return Err(StorageError::corrupt("sync_queue", e)),
            }
        }
        Ok(counts)
    }

    fn pending_by_entity(&self) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, COUNT(*) FROM sync_queue
             WHERE status IN ('pending', 'processing')
             GROUP BY entity_type",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(entity, count)| (entity, usize::try_from(count).unwrap_or(0)))
            .collect())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn all_meta(&self) -> Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM sync_metadata ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(rows)
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tables = self.tables.clone();
        let ops = batch.len();
        self.mutate("commit", |tx| {
            for op in batch.ops() {
                apply_op(tx, &tables, op)?;
            }
            Ok(())
        })?;
        trace!(ops, "batch applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operation;
    use serde_json::{json, Map};

    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_memory().unwrap();
        store.ensure_entity("tours").unwrap();
        store
    }

    fn tour(id: &str, updated_at: i64, title: &str) -> Record {
        Record::new(id, updated_at, json!({"title": title}).as_object().unwrap().clone())
    }

    #[test]
    fn test_record_roundtrip() {
        let mut store = store();
        store
            .put_record("tours", StoredRecord::pending(tour("t1", 10, "Kyoto")))
            .unwrap();

        let got = store.get_record("tours", "t1").unwrap().unwrap();
        assert_eq!(got.record, tour("t1", 10, "Kyoto"));
        assert!(got.is_pending());
        assert!(!got.deleted);

        assert!(store.get_record("tours", "nope").unwrap().is_none());
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        let store = store();
        assert!(matches!(
            store.get_record("rockets", "x"),
            Err(StorageError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_list_records_filters() {
        let mut store = store();
        store
            .put_record("tours", StoredRecord::pending(tour("a", 1, "Kyoto")))
            .unwrap();
        store
            .put_record("tours", StoredRecord::synced(tour("b", 2, "Osaka")))
            .unwrap();
        store
            .put_record("tours", StoredRecord::tombstone(tour("c", 3, "Nara")))
            .unwrap();

        assert_eq!(store.list_records("tours", &RecordFilter::all()).unwrap().len(), 2);
        assert_eq!(
            store
                .list_records("tours", &RecordFilter::everything())
                .unwrap()
                .len(),
            3
        );
        let synced = store
            .list_records("tours", &RecordFilter::all().with_status(RecordSyncStatus::Synced))
            .unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].record.id, "b");

        let kyoto = store
            .list_records("tours", &RecordFilter::all().where_eq("title", json!("Kyoto")))
            .unwrap();
        assert_eq!(kyoto.len(), 1);
        assert_eq!(kyoto[0].record.id, "a");
    }

    #[test]
    fn test_queue_assigns_seq_in_append_order() {
        let mut store = store();
        for id in ["a", "b", "c"] {
            let item = SyncQueueItem::new("tours", Operation::Create, tour(id, 1, id));
            store.put_queue_item(item).unwrap();
        }

        let items = store.list_queue(&QueueFilter::all()).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(items.windows(2).all(|w| w[0].seq < w[1].seq));

        // Updating an item keeps its position.
        let mut first = items[0].clone();
        first.status = QueueStatus::Completed;
        store.put_queue_item(first.clone()).unwrap();
        let reloaded = store.get_queue_item(&first.id).unwrap().unwrap();
        assert_eq!(reloaded.seq, first.seq);
        assert_eq!(reloaded.status, QueueStatus::Completed);

        let counts = store.queue_counts().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(store.pending_by_entity().unwrap().get("tours"), Some(&2));
    }

    #[test]
    fn test_commit_is_atomic() {
        let mut store = store();
        let batch = WriteBatch::new()
            .put_record("tours", StoredRecord::pending(tour("a", 1, "x")))
            .put_record("rockets", StoredRecord::pending(tour("b", 1, "y")));
        assert!(store.commit(batch).is_err());
        assert!(store.get_record("tours", "a").unwrap().is_none());
    }

    #[test]
    fn test_meta() {
        let mut store = store();
        assert!(store.get_meta("last_sync_time").unwrap().is_none());
        store.set_meta("last_sync_time", "123").unwrap();
        store.set_meta("last_sync_time", "456").unwrap();
        assert_eq!(store.get_meta("last_sync_time").unwrap().as_deref(), Some("456"));
        assert_eq!(store.all_meta().unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_entity_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.ensure_entity("orders").unwrap();
            store
                .put_record("orders", StoredRecord::pending(Record::new("o1", 1, Map::new())))
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.entity_types(), vec!["orders".to_string()]);
        assert!(store.get_record("orders", "o1").unwrap().is_some());
    }
}
