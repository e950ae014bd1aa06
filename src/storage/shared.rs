//! Shared store handle with in-memory fallback.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use super::memory::MemoryStore;
use super::types::{QueueFilter, RecordFilter, StorageError, WriteBatch};
use super::LocalStore;

struct Inner {
    store: Box<dyn LocalStore>,
    degraded: bool,
}

/// Cloneable handle to the active [`LocalStore`].
///
/// The offline manager and the sync engine hold clones of the same handle,
/// so both see the swap when the store degrades to memory. The lock is only
/// held for the duration of one closure and never across an `.await`.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl SharedStore {
    pub fn new(store: impl LocalStore + 'static) -> Self {
        Self::from_box(Box::new(store), false)
    }

    /// A store that starts out in memory (and is reported as degraded).
    #[must_use]
    pub fn memory_fallback() -> Self {
        Self::from_box(Box::new(MemoryStore::new()), true)
    }

    fn from_box(store: Box<dyn LocalStore>, degraded: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { store, degraded })),
        }
    }

    /// Run `f` against the active store.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn LocalStore) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(inner.store.as_mut())
    }

    /// Like [`with`](Self::with), but a quota/unavailable failure degrades
    /// the store and runs `f` once more against memory.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error if it is not degradable or fails again.
    pub fn with_fallback<R>(
        &self,
        f: impl Fn(&mut dyn LocalStore) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        match self.with(&f) {
            Err(e) if e.is_degradable() => {
                self.degrade(&e);
                self.with(&f)
            }
            other => other,
        }
    }

    /// Whether the store has fallen back to memory.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .degraded
    }

    /// Replace the active store with memory, carrying over whatever the
    /// failing store can still read.
    ///
    /// Calling this when already degraded does nothing.
    pub fn degrade(&self, cause: &StorageError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.degraded {
            return;
        }

        warn!(
            error = %cause,
            "Local store unavailable, falling back to in-memory storage; changes will not survive a restart"
        );

        let mut memory = MemoryStore::new();
        if let Err(e) = copy_readable(inner.store.as_ref(), &mut memory) {
            warn!(error = %e, "Could not carry over all data from the failing store");
        }

        inner.store = Box::new(memory);
        inner.degraded = true;
    }
}

/// Copy entity tables, records, queue and metadata from `from` into `to`.
fn copy_readable(from: &dyn LocalStore, to: &mut MemoryStore) -> Result<(), StorageError> {
    let mut batch = WriteBatch::new();
    let mut first_error = None;

    for entity_type in from.entity_types() {
        to.ensure_entity(&entity_type)?;
        match from.list_records(&entity_type, &RecordFilter::everything()) {
            Ok(records) => {
                for stored in records {
                    batch = batch.put_record(&entity_type, stored);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match from.list_queue(&QueueFilter::all()) {
        Ok(items) => {
            for item in items {
                batch = batch.put_queue_item(item);
            }
        }
        Err(e) => {
            first_error.get_or_insert(e);
        }
    }
    match from.all_meta() {
        Ok(meta) => {
            for (key, value) in meta {
                batch = batch.set_meta(&key, value);
            }
        }
        Err(e) => {
            first_error.get_or_insert(e);
        }
    }

    to.commit(batch)?;
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Operation, QueueCounts, Record, StoredRecord, SyncQueueItem};
    use serde_json::Map;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Wraps a memory store and rejects commits with `error` while `armed`.
    pub(crate) struct FailingCommits {
        pub inner: MemoryStore,
        pub armed: Arc<AtomicBool>,
        pub error: fn() -> StorageError,
    }

    impl FailingCommits {
        /// Every write fails with a disk-full error.
        pub(crate) fn full_disk(inner: MemoryStore) -> Self {
            Self {
                inner,
                armed: Arc::new(AtomicBool::new(true)),
                error: || StorageError::QuotaExceeded("database or disk is full".into()),
            }
        }

        /// Writes fail with a non-degradable SQLite error once `armed` is set.
        pub(crate) fn broken_when(inner: MemoryStore, armed: Arc<AtomicBool>) -> Self {
            Self {
                inner,
                armed,
                error: || StorageError::Sqlite("disk I/O error".into()),
            }
        }
    }

    impl LocalStore for FailingCommits {
        fn ensure_entity(&mut self, entity_type: &str) -> Result<(), StorageError> {
            self.inner.ensure_entity(entity_type)
        }
        fn entity_types(&self) -> Vec<String> {
            self.inner.entity_types()
        }
        fn get_record(&self, e: &str, id: &str) -> Result<Option<StoredRecord>, StorageError> {
            self.inner.get_record(e, id)
        }
        fn list_records(&self, e: &str, f: &RecordFilter) -> Result<Vec<StoredRecord>, StorageError> {
            self.inner.list_records(e, f)
        }
        fn get_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>, StorageError> {
            self.inner.get_queue_item(id)
        }
        fn list_queue(&self, f: &QueueFilter) -> Result<Vec<SyncQueueItem>, StorageError> {
            self.inner.list_queue(f)
        }
        fn queue_counts(&self) -> Result<QueueCounts, StorageError> {
            self.inner.queue_counts()
        }
        fn pending_by_entity(&self) -> Result<BTreeMap<String, usize>, StorageError> {
            self.inner.pending_by_entity()
        }
        fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_meta(key)
        }
        fn all_meta(&self) -> Result<BTreeMap<String, String>, StorageError> {
            self.inner.all_meta()
        }
        fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
            if self.armed.load(Ordering::SeqCst) {
                return Err((self.error)());
            }
            self.inner.commit(batch)
        }
    }

    #[test]
    fn test_degrade_carries_over_data() {
        let mut seed = MemoryStore::new();
        seed.ensure_entity("tours").unwrap();
        seed.put_record("tours", StoredRecord::pending(Record::new("t1", 1, Map::new())))
            .unwrap();
        seed.put_queue_item(SyncQueueItem::new(
            "tours",
            Operation::Create,
            Record::new("t1", 1, Map::new()),
        ))
        .unwrap();

        let shared = SharedStore::new(FailingCommits::full_disk(seed));
        let err = shared
            .with(|s| s.put_record("tours", StoredRecord::pending(Record::new("t2", 1, Map::new()))))
            .unwrap_err();
        assert!(err.is_degradable());

        shared.degrade(&err);
        assert!(shared.is_degraded());

        shared
            .with(|s| s.put_record("tours", StoredRecord::pending(Record::new("t2", 1, Map::new()))))
            .unwrap();
        let (t1, t2, queued) = shared.with(|s| {
            (
                s.get_record("tours", "t1").unwrap(),
                s.get_record("tours", "t2").unwrap(),
                s.queue_counts().unwrap().pending,
            )
        });
        assert!(t1.is_some());
        assert!(t2.is_some());
        assert_eq!(queued, 1);
    }
}
