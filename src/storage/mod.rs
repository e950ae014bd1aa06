//! Local persistence for records, the sync queue and sync metadata.
//!
//! This module provides:
//! - The [`LocalStore`] trait every backend implements
//! - A SQLite backend with WAL mode and per-entity record tables
//! - An in-memory backend used for degraded mode and tests
//! - [`SharedStore`], the handle the offline manager and sync engine share
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`migrations`] - Versioned schema upgrades
//! - [`sqlite`] - SQLite storage implementation
//! - [`memory`] - In-memory storage implementation
//! - [`shared`] - Shared, degradable store handle

use std::collections::BTreeMap;

use crate::model::{QueueCounts, StoredRecord, SyncQueueItem};

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod shared;
pub mod sqlite;
pub mod types;

pub use memory::MemoryStore;
pub use shared::SharedStore;
pub use sqlite::SqliteStore;
pub use types::{QueueFilter, RecordFilter, StorageError, WriteBatch, WriteOp};

/// A local persistence backend.
///
/// Every mutating call is atomic. [`commit`](Self::commit) applies a whole
/// [`WriteBatch`] in one transaction; the single-op helpers are batches of one.
pub trait LocalStore: Send {
    /// Make sure record storage exists for an entity type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntityType` for names that are not identifiers.
    fn ensure_entity(&mut self, entity_type: &str) -> Result<(), StorageError>;

    /// Entity types with record storage, sorted.
    fn entity_types(&self) -> Vec<String>;

    /// Fetch one record, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the entity type has no storage.
    fn get_record(&self, entity_type: &str, id: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// List records, newest first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the entity type has no storage.
    fn list_records(
        &self,
        entity_type: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>, StorageError>;

    /// List queue items in append (`seq`) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<SyncQueueItem>, StorageError>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn queue_counts(&self) -> Result<QueueCounts, StorageError>;

    /// Outstanding (pending or processing) item count per entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn pending_by_entity(&self) -> Result<BTreeMap<String, usize>, StorageError>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn all_meta(&self) -> Result<BTreeMap<String, String>, StorageError>;

    /// Apply every op in the batch, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first failing op's error; nothing is written in that case.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    fn put_record(&mut self, entity_type: &str, record: StoredRecord) -> Result<(), StorageError> {
        self.commit(WriteBatch::new().put_record(entity_type, record))
    }

    /// Remove a record row outright (tombstones included).
    ///
    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    fn delete_record(&mut self, entity_type: &str, id: &str) -> Result<(), StorageError> {
        self.commit(WriteBatch::new().delete_record(entity_type, id))
    }

    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    fn put_queue_item(&mut self, item: SyncQueueItem) -> Result<(), StorageError> {
        self.commit(WriteBatch::new().put_queue_item(item))
    }

    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    fn delete_queue_item(&mut self, id: &str) -> Result<(), StorageError> {
        self.commit(WriteBatch::new().delete_queue_item(id))
    }

    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    fn set_meta(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.commit(WriteBatch::new().set_meta(key, value))
    }
}
