//! The CRUD facade business code calls.
//!
//! Reads hit the local store only. Writes update the local store and append
//! a sync queue item in the same transaction, then return without touching
//! the network.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mapper::{generate_id, is_valid_id, SchemaRegistry};
use crate::model::{now_millis, Operation, Record, StoredRecord, SyncQueueItem};
use crate::storage::{LocalStore, RecordFilter, SharedStore, SqliteStore, WriteBatch};

/// Local field stamped with the creation time on `create`.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Offline-first CRUD over the local store.
#[derive(Debug, Clone)]
pub struct OfflineManager {
    store: SharedStore,
    registry: Arc<SchemaRegistry>,
    changes: Option<Arc<Notify>>,
}

impl OfflineManager {
    /// Wrap an existing store, creating record storage for every registered
    /// entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if record storage cannot be created and the store
    /// cannot fall back to memory.
    pub fn new(store: SharedStore, registry: Arc<SchemaRegistry>) -> Result<Self> {
        let manager = Self {
            store,
            registry,
            changes: None,
        };
        manager.run(|store| {
            for entity_type in manager.registry.entity_types() {
                store.ensure_entity(entity_type)?;
            }
            Ok(())
        })?;
        Ok(manager)
    }

    /// Open (or create) the SQLite database at `path`.
    ///
    /// If the database cannot be opened at all (read-only media, disk full)
    /// the manager starts in degraded in-memory mode instead of failing.
    ///
    /// # Errors
    ///
    /// Returns an error for non-recoverable database failures.
    pub fn open(path: &Path, registry: Arc<SchemaRegistry>) -> Result<Self> {
        let store = match SqliteStore::open(path) {
            Ok(sqlite) => SharedStore::new(sqlite),
            Err(e) if e.is_degradable() => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cannot open local database, running in memory; changes will not survive a restart"
                );
                SharedStore::memory_fallback()
            }
            Err(e) => return Err(e.into()),
        };
        Self::new(store, registry)
    }

    /// A manager over a fresh in-memory SQLite database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn in_memory(registry: Arc<SchemaRegistry>) -> Result<Self> {
        Self::new(SharedStore::new(SqliteStore::open_memory()?), registry)
    }

    /// Poke `notify` after every enqueued mutation.
    #[must_use]
    pub fn with_change_notifier(mut self, notify: Arc<Notify>) -> Self {
        self.changes = Some(notify);
        self
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Whether writes are currently going to memory only.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    /// Run `f` against the store; on a quota/unavailable failure, fall back
    /// to memory and run it once more.
    fn run<R>(&self, f: impl Fn(&mut dyn LocalStore) -> Result<R>) -> Result<R> {
        match self.store.with(&f) {
            Err(Error::Storage(e)) if e.is_degradable() => {
                self.store.degrade(&e);
                self.store.with(&f)
            }
            other => other,
        }
    }

    fn notify(&self) {
        if let Some(changes) = &self.changes {
            changes.notify_one();
        }
    }

    /// Create a record and queue it for upload.
    ///
    /// Uses `data.id` when present, otherwise generates one. `createdAt` is
    /// stamped when absent.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `InvalidArgument` for a bad id, or `RecordExists`
    /// when a live record already has that id.
    pub fn create(&self, entity_type: &str, mut data: Map<String, Value>) -> Result<Record> {
        self.registry.get(entity_type)?;

        let id = match data.remove("id") {
            None | Some(Value::Null) => generate_id(),
            Some(Value::String(id)) if is_valid_id(&id) => id,
            Some(other) => {
                return Err(Error::InvalidArgument(format!("invalid record id: {other}")));
            }
        };
        let now = now_millis();
        data.entry(CREATED_AT_FIELD.to_string())
            .or_insert_with(|| Value::from(now));

        let record = self.run(|store| {
            let mut updated_at = now;
            if let Some(existing) = store.get_record(entity_type, &id)? {
                if !existing.deleted {
                    return Err(Error::RecordExists {
                        entity_type: entity_type.to_string(),
                        id: id.clone(),
                    });
                }
                updated_at = updated_at.max(existing.record.updated_at + 1);
            }

            let record = Record::new(id.clone(), updated_at, data.clone());
            store.commit(
                WriteBatch::new()
                    .put_record(entity_type, StoredRecord::pending(record.clone()))
                    .put_queue_item(SyncQueueItem::new(
                        entity_type,
                        Operation::Create,
                        record.clone(),
                    )),
            )?;
            Ok(record)
        })?;

        debug!(entity_type, id = %record.id, "Created record");
        self.notify();
        Ok(record)
    }

    /// Merge `patch` onto a record and queue the full result for upload.
    ///
    /// `id` and `updatedAt` keys in the patch are ignored.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, or `RecordNotFound` if the record does not exist or
    /// was deleted.
    pub fn update(&self, entity_type: &str, id: &str, patch: &Map<String, Value>) -> Result<Record> {
        self.registry.get(entity_type)?;

        let record = self.run(|store| {
            let stored = store
                .get_record(entity_type, id)?
                .filter(|stored| !stored.deleted)
                .ok_or_else(|| Error::RecordNotFound {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                })?;

            let mut record = stored.record;
            record.merge_patch(patch);
            record.updated_at = now_millis().max(record.updated_at + 1);

            store.commit(
                WriteBatch::new()
                    .put_record(entity_type, StoredRecord::pending(record.clone()))
                    .put_queue_item(SyncQueueItem::new(
                        entity_type,
                        Operation::Update,
                        record.clone(),
                    )),
            )?;
            Ok(record)
        })?;

        debug!(entity_type, id, "Updated record");
        self.notify();
        Ok(record)
    }

    /// Tombstone a record and queue its remote deletion.
    ///
    /// Returns `false` (and queues nothing) if there was no live record.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or a storage failure.
    pub fn delete(&self, entity_type: &str, id: &str) -> Result<bool> {
        self.registry.get(entity_type)?;

        let deleted = self.run(|store| {
            let Some(stored) = store
                .get_record(entity_type, id)?
                .filter(|stored| !stored.deleted)
            else {
                return Ok(false);
            };

            let mut record = stored.record;
            record.updated_at = now_millis().max(record.updated_at + 1);

            store.commit(
                WriteBatch::new()
                    .put_record(entity_type, StoredRecord::tombstone(record.clone()))
                    .put_queue_item(SyncQueueItem::new(entity_type, Operation::Delete, record)),
            )?;
            Ok(true)
        })?;

        if deleted {
            debug!(entity_type, id, "Deleted record");
            self.notify();
        }
        Ok(deleted)
    }

    /// Fetch a live record.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or a storage failure.
    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        Ok(self
            .get_stored(entity_type, id)?
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.record))
    }

    /// Fetch a record with its sync bookkeeping, tombstones included.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or a storage failure.
    pub fn get_stored(&self, entity_type: &str, id: &str) -> Result<Option<StoredRecord>> {
        self.registry.get(entity_type)?;
        self.run(|store| Ok(store.get_record(entity_type, id)?))
    }

    /// List records matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or a storage failure.
    pub fn list(&self, entity_type: &str, filter: &RecordFilter) -> Result<Vec<Record>> {
        Ok(self
            .list_stored(entity_type, filter)?
            .into_iter()
            .map(|stored| stored.record)
            .collect())
    }

    /// Like [`list`](Self::list) but keeps sync bookkeeping.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or a storage failure.
    pub fn list_stored(&self, entity_type: &str, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        self.registry.get(entity_type)?;
        self.run(|store| Ok(store.list_records(entity_type, filter)?))
    }
}
