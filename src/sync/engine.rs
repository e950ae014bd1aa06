//! The sync engine: drains the queue to the remote and pulls remote changes.
//!
//! A pass runs `pulling-queue → pushing → pulling-remote → reconciling`.
//! At most one pass runs at a time per engine; [`SyncEngine::sync_now`]
//! joins a pass that is already in flight instead of starting another.
//!
//! The engine is the only writer of queue item status and retry counts.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::conflict::{resolve, MergeStrategy, RemoteVersion, Winner};
use super::hash::content_hash;
use super::remote::RemoteStore;
use super::status::{
    get_sync_status, load_conflict_log, parse_cursor, pull_cursor_key, CONFLICT_LOG_KEY,
    LAST_SYNC_KEY,
};
use super::types::{ChangeSeq, PassReport, RemoteChange, RemoteError, SyncPhase};
use crate::error::{Error, Result};
use crate::mapper::{EntitySchema, SchemaRegistry};
use crate::model::{
    now_millis, Operation, QueueStatus, Record, StoredRecord, SyncIssue, SyncIssueKind,
    SyncQueueItem, SyncStatus,
};
use crate::storage::{LocalStore, QueueFilter, SharedStore, StorageError, WriteBatch};

/// Queue items marked with this error were overridden by a newer remote copy.
pub const SUPERSEDED: &str = "superseded by remote";

/// Tunables for sync passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOptions {
    /// Most queue items pushed per pass.
    pub batch_size: usize,
    /// Failed attempts before an item becomes terminal.
    pub max_retries: u32,
    /// Backoff after the first failure; doubles on each further failure.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// How long completed items are kept before pruning.
    pub completed_retention: Duration,
    /// Most conflicts kept for `SyncStatus.errors`.
    pub conflict_log_limit: usize,
    pub merge_strategy: MergeStrategy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            completed_retention: Duration::from_secs(7 * 24 * 60 * 60),
            conflict_log_limit: 100,
            merge_strategy: MergeStrategy::PreferNewer,
        }
    }
}

/// Result of applying one remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Applied,
    Unchanged,
    Conflict(Winner),
}

/// How the most recent pass ended, kept for callers that joined it.
type PassOutcome = std::result::Result<PassReport, String>;

/// Clears the syncing flag when the pass ends, however it ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A local record as the remote would hold it: device-only fields removed.
fn remote_view(schema: &EntitySchema, record: &Record) -> Record {
    let mut view = record.clone();
    for field in &schema.excluded {
        view.fields.remove(field);
    }
    view
}

/// `remote` with the device-only fields of `local` carried over.
fn keep_local_only(schema: &EntitySchema, local: &Record, remote: &Record) -> Record {
    let mut merged = remote.clone();
    for field in &schema.excluded {
        if let Some(value) = local.fields.get(field) {
            merged.fields.insert(field.clone(), value.clone());
        }
    }
    merged
}

/// Pushes queued mutations and pulls remote changes for every registered
/// entity type.
#[derive(Debug)]
pub struct SyncEngine<R> {
    store: SharedStore,
    registry: Arc<SchemaRegistry>,
    remote: R,
    options: SyncOptions,
    pass_lock: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    phase: Mutex<SyncPhase>,
    last_report: Mutex<Option<PassReport>>,
    last_outcome: Mutex<Option<PassOutcome>>,
    /// Mirrors the persisted conflict log.
    conflicts: Mutex<VecDeque<SyncIssue>>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(
        store: SharedStore,
        registry: Arc<SchemaRegistry>,
        remote: R,
        options: SyncOptions,
    ) -> Self {
        let mut conflicts: VecDeque<SyncIssue> = match load_conflict_log(&store) {
            Ok(log) => log.into(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable conflict log");
                VecDeque::new()
            }
        };
        while conflicts.len() > options.conflict_log_limit {
            conflicts.pop_front();
        }
        Self {
            store,
            registry,
            remote,
            options,
            pass_lock: tokio::sync::Mutex::new(()),
            syncing: AtomicBool::new(false),
            phase: Mutex::new(SyncPhase::Idle),
            last_report: Mutex::new(None),
            last_outcome: Mutex::new(None),
            conflicts: Mutex::new(conflicts),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Whether a pass is running right now.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *lock(&self.phase)
    }

    /// Report of the most recent successful pass.
    #[must_use]
    pub fn last_report(&self) -> Option<PassReport> {
        lock(&self.last_report).clone()
    }

    /// Recent conflicts, oldest first.
    #[must_use]
    pub fn conflicts(&self) -> Vec<SyncIssue> {
        lock(&self.conflicts).iter().cloned().collect()
    }

    /// Forget every logged conflict, in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored log cannot be removed.
    pub fn clear_conflicts(&self) -> Result<()> {
        lock(&self.conflicts).clear();
        self.store
            .with_fallback(|s| s.set_meta(CONFLICT_LOG_KEY, "[]"))?;
        Ok(())
    }

    /// Current sync status, recomputed from the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn status(&self) -> Result<SyncStatus> {
        Ok(get_sync_status(
            &self.store,
            &self.conflicts(),
            self.is_syncing(),
        )?)
    }

    /// Run a pass now, or wait for the in-flight pass and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage fails during the pass, or
    /// `PassFailed` if the joined pass failed. Remote failures are recorded
    /// on queue items and in the report instead.
    pub async fn sync_now(&self) -> Result<PassReport> {
        if let Ok(guard) = self.pass_lock.try_lock() {
            let report = self.run_pass().await;
            drop(guard);
            return report;
        }

        debug!("Sync pass already in flight, waiting for it");
        let _guard = self.pass_lock.lock().await;
        match lock(&self.last_outcome).clone() {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(Error::PassFailed(message)),
            None => Ok(PassReport::default()),
        }
    }

    /// Run a pass unless one is already in flight.
    ///
    /// Returns `None` without waiting when a pass is running.
    pub async fn try_sync(&self) -> Option<Result<PassReport>> {
        let guard = self.pass_lock.try_lock().ok()?;
        let report = self.run_pass().await;
        drop(guard);
        Some(report)
    }

    /// Requeue every failed item with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be updated.
    pub async fn retry_failed(&self) -> Result<usize> {
        let _guard = self.pass_lock.lock().await;
        Ok(requeue_failed(&self.store)?)
    }

    /// Delete completed items older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be updated.
    pub fn prune_completed(&self) -> Result<usize> {
        let retention = i64::try_from(self.options.completed_retention.as_millis()).unwrap_or(i64::MAX);
        Ok(prune_completed_before(
            &self.store,
            now_millis().saturating_sub(retention),
        )?)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *lock(&self.phase) = phase;
        debug!(phase = phase.as_str(), "Sync phase");
    }

    async fn run_pass(&self) -> Result<PassReport> {
        let _syncing = SyncingGuard::set(&self.syncing);
        let started = std::time::Instant::now();
        info!("Sync pass started");

        let result = self.pass().await;
        self.set_phase(SyncPhase::Idle);

        match &result {
            Ok(report) => {
                info!(
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Sync pass finished: {}",
                    report.summary()
                );
                *lock(&self.last_report) = Some(report.clone());
                *lock(&self.last_outcome) = Some(Ok(report.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Sync pass failed");
                *lock(&self.last_outcome) = Some(Err(e.to_string()));
            }
        }
        result
    }

    async fn pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();

        self.set_phase(SyncPhase::PullingQueue);
        report.recovered = self.recover_stale()?;
        let batch = self.select_batch(now_millis())?;
        self.mark_processing(&batch)?;

        self.set_phase(SyncPhase::Pushing);
        self.push(batch, &mut report).await?;

        if !report.interrupted {
            self.pull(&mut report).await?;
        }

        report.pruned = self.prune_completed()?;

        if !report.interrupted {
            let now = rfc3339(Utc::now());
            self.store
                .with_fallback(|s| s.set_meta(LAST_SYNC_KEY, &now))?;
        }
        Ok(report)
    }

    /// Return items left `processing` by an interrupted pass to `pending`.
    fn recover_stale(&self) -> std::result::Result<usize, StorageError> {
        let count = self.store.with_fallback(|s| {
            let stale = s.list_queue(&QueueFilter::with_status(QueueStatus::Processing))?;
            let count = stale.len();
            let mut batch = WriteBatch::new();
            for mut item in stale {
                item.status = QueueStatus::Pending;
                batch = batch.put_queue_item(item);
            }
            s.commit(batch)?;
            Ok(count)
        })?;
        if count > 0 {
            warn!(count, "Recovered queue items left in processing");
        }
        Ok(count)
    }

    /// Pick up to `batch_size` pending items in append order.
    ///
    /// An item still backing off blocks every later item for the same
    /// record, so per-record order is never violated.
    fn select_batch(&self, now: i64) -> std::result::Result<Vec<SyncQueueItem>, StorageError> {
        let pending = self
            .store
            .with_fallback(|s| s.list_queue(&QueueFilter::with_status(QueueStatus::Pending)))?;

        let mut blocked = HashSet::new();
        let mut batch = Vec::new();
        for item in pending {
            if batch.len() >= self.options.batch_size {
                break;
            }
            let key = item.record_key();
            if blocked.contains(&key) {
                continue;
            }
            if item.next_attempt_at > now {
                blocked.insert(key);
                continue;
            }
            batch.push(item);
        }
        debug!(selected = batch.len(), "Selected queue batch");
        Ok(batch)
    }

    fn mark_processing(&self, batch: &[SyncQueueItem]) -> std::result::Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        self.store.with_fallback(|s| {
            let mut write = WriteBatch::new();
            for item in batch {
                let mut item = item.clone();
                item.status = QueueStatus::Processing;
                item.updated_at = now;
                write = write.put_queue_item(item);
            }
            s.commit(write)
        })
    }

    fn return_to_pending(&self, items: &[SyncQueueItem]) -> std::result::Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }
        self.store.with_fallback(|s| {
            let mut write = WriteBatch::new();
            for item in items {
                let mut item = item.clone();
                item.status = QueueStatus::Pending;
                write = write.put_queue_item(item);
            }
            s.commit(write)
        })
    }

    async fn push(&self, batch: Vec<SyncQueueItem>, report: &mut PassReport) -> Result<()> {
        // Records with a failure earlier in this pass; later items wait.
        let mut held = HashSet::new();
        let mut deferred = Vec::new();
        let mut items = batch.into_iter();

        while let Some(item) = items.next() {
            if held.contains(&item.record_key()) {
                deferred.push(item);
                continue;
            }

            report.pushed += 1;
            match self.send(&item).await {
                Ok(()) => {
                    self.complete(&item)?;
                    report.completed += 1;
                }
                Err(Error::Remote(e)) if e.is_transport() => {
                    warn!(error = %e, "Remote unreachable, stopping pass");
                    report.pushed -= 1;
                    report.interrupted = true;
                    report.error = Some(e.to_string());
                    deferred.push(item);
                    deferred.extend(items.by_ref());
                    break;
                }
                Err(Error::Mapping(e)) => {
                    self.fail_permanently(&item, &e.to_string())?;
                    report.failed += 1;
                    held.insert(item.record_key());
                }
                Err(Error::Remote(e)) => {
                    if self.record_failure(&item, &e)? {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                    held.insert(item.record_key());
                }
                Err(e) => return Err(e),
            }
        }

        report.deferred += deferred.len();
        self.return_to_pending(&deferred)?;
        Ok(())
    }

    /// Deliver one item. Re-deliveries the remote already applied succeed.
    async fn send(&self, item: &SyncQueueItem) -> Result<()> {
        let schema = self.registry.get(&item.entity_type)?;
        let collection = schema.remote_name.as_str();
        let id = item.entity_id.as_str();

        debug!(
            entity_type = %item.entity_type,
            id,
            operation = %item.operation,
            attempt = item.retry_count + 1,
            "Pushing"
        );

        match item.operation {
            Operation::Create => {
                let row = self.registry.to_remote_shape(&item.entity_type, &item.payload)?;
                match self.remote.create(collection, &row).await {
                    Ok(()) | Err(RemoteError::AlreadyExists) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Operation::Update => {
                let row = self.registry.to_remote_shape(&item.entity_type, &item.payload)?;
                match self.remote.update(collection, id, &row).await {
                    Ok(()) => Ok(()),
                    Err(RemoteError::NotFound) => match self.remote.create(collection, &row).await {
                        Ok(()) | Err(RemoteError::AlreadyExists) => Ok(()),
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(e.into()),
                }
            }
            Operation::Delete => match self.remote.delete(collection, id).await {
                Ok(()) | Err(RemoteError::NotFound) => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Mark an item completed and settle the local record when nothing else
    /// is outstanding for it.
    fn complete(&self, item: &SyncQueueItem) -> std::result::Result<(), StorageError> {
        let now = now_millis();
        self.store.with_fallback(|s| {
            let mut done = item.clone();
            done.status = QueueStatus::Completed;
            done.last_error = None;
            done.updated_at = now;
            let mut batch = WriteBatch::new().put_queue_item(done);

            let others_outstanding = s
                .list_queue(&QueueFilter::for_record(&item.entity_type, &item.entity_id))?
                .iter()
                .any(|other| other.id != item.id && other.is_outstanding());

            if !others_outstanding {
                if let Some(stored) = s.get_record(&item.entity_type, &item.entity_id)? {
                    if stored.deleted {
                        if item.operation == Operation::Delete {
                            batch = batch.delete_record(&item.entity_type, &item.entity_id);
                        }
                    } else if stored.is_pending() {
                        batch = batch.put_record(&item.entity_type, StoredRecord::synced(stored.record));
                    }
                }
            }
            s.commit(batch)
        })
    }

    /// Count a failed attempt. Returns `true` if the item is now terminal.
    fn record_failure(
        &self,
        item: &SyncQueueItem,
        error: &RemoteError,
    ) -> std::result::Result<bool, StorageError> {
        let now = now_millis();
        let mut updated = item.clone();
        updated.retry_count += 1;
        updated.last_error = Some(error.to_string());
        updated.updated_at = now;

        let terminal = updated.retry_count >= self.options.max_retries;
        if terminal {
            updated.status = QueueStatus::Failed;
            warn!(
                entity_type = %item.entity_type,
                id = %item.entity_id,
                operation = %item.operation,
                retries = updated.retry_count,
                error = %error,
                "Queue item failed permanently"
            );
        } else {
            updated.status = QueueStatus::Pending;
            updated.next_attempt_at = now.saturating_add(self.backoff_millis(updated.retry_count));
            debug!(
                entity_type = %item.entity_type,
                id = %item.entity_id,
                retries = updated.retry_count,
                error = %error,
                "Push failed, will retry"
            );
        }

        self.store
            .with_fallback(|s| s.put_queue_item(updated.clone()))?;
        Ok(terminal)
    }

    /// Fail an item that can never succeed (it cannot be translated).
    fn fail_permanently(&self, item: &SyncQueueItem, reason: &str) -> std::result::Result<(), StorageError> {
        warn!(
            entity_type = %item.entity_type,
            id = %item.entity_id,
            reason,
            "Queue item cannot be sent"
        );
        let mut updated = item.clone();
        updated.status = QueueStatus::Failed;
        updated.last_error = Some(reason.to_string());
        updated.updated_at = now_millis();
        self.store
            .with_fallback(|s| s.put_queue_item(updated.clone()))
    }

    fn backoff_millis(&self, retry_count: u32) -> i64 {
        let base = self.options.retry_backoff.as_millis();
        let factor = 1u128 << retry_count.saturating_sub(1).min(32);
        let delay = base
            .saturating_mul(factor)
            .min(self.options.max_backoff.as_millis());
        i64::try_from(delay).unwrap_or(i64::MAX)
    }

    async fn pull(&self, report: &mut PassReport) -> Result<()> {
        let entity_types: Vec<String> = self.registry.entity_types().map(str::to_string).collect();

        for entity_type in entity_types {
            let schema = self.registry.get(&entity_type)?;
            let cursor_key = pull_cursor_key(&entity_type);
            let cursor = self
                .store
                .with_fallback(|s| {
                    s.ensure_entity(&entity_type)?;
                    s.get_meta(&cursor_key)
                })?
                .as_deref()
                .and_then(parse_cursor);

            self.set_phase(SyncPhase::PullingRemote);
            let changes = match self.remote.list_since(&schema.remote_name, cursor).await {
                Ok(changes) => changes,
                Err(e) if e.is_transport() => {
                    warn!(error = %e, "Remote unreachable during pull, stopping pass");
                    report.interrupted = true;
                    report.error = Some(e.to_string());
                    return Ok(());
                }
                Err(e) => {
                    warn!(entity_type, error = %e, "Pull failed, skipping entity this pass");
                    continue;
                }
            };

            self.set_phase(SyncPhase::Reconciling);
            let mut newest: Option<ChangeSeq> = cursor;
            for change in changes {
                newest = Some(newest.map_or(change.seq(), |n| n.max(change.seq())));
                match self.reconcile(&entity_type, &change) {
                    Ok(Reconciled::Applied) => report.pulled += 1,
                    Ok(Reconciled::Unchanged) => report.unchanged += 1,
                    Ok(Reconciled::Conflict(winner)) => {
                        report.conflicts += 1;
                        if winner == Winner::Remote {
                            report.pulled += 1;
                        }
                    }
                    Err(Error::Mapping(e)) => {
                        warn!(entity_type, id = ?change.id(), error = %e, "Skipping remote row");
                    }
                    Err(e) => return Err(e),
                }
            }

            if newest > cursor {
                if let Some(newest) = newest {
                    let value = newest.to_string();
                    self.store
                        .with_fallback(|s| s.set_meta(&cursor_key, &value))?;
                }
            }
        }
        Ok(())
    }

    fn reconcile(&self, entity_type: &str, change: &RemoteChange) -> Result<Reconciled> {
        match change {
            RemoteChange::Upsert { row, .. } => {
                let schema = self.registry.get(entity_type)?;
                let remote = self.registry.from_remote_shape(entity_type, row)?;
                let outcome = self
                    .store
                    .with_fallback(|s| self.apply_upsert(s, schema, &remote))?;
                if let Reconciled::Conflict(winner) = outcome {
                    self.log_conflict(entity_type, &remote.id, winner)?;
                }
                Ok(outcome)
            }
            RemoteChange::Deleted { id, deleted_at, .. } => {
                let deleted_at = deleted_at.map(|at| at.timestamp_millis());
                let outcome = self
                    .store
                    .with_fallback(|s| self.apply_delete(s, entity_type, id, deleted_at))?;
                if let Reconciled::Conflict(winner) = outcome {
                    self.log_conflict(entity_type, id, winner)?;
                }
                Ok(outcome)
            }
        }
    }

    /// Apply a pulled row. Device-only fields never travel, so they are
    /// ignored when comparing and kept from the local copy when overwriting.
    fn apply_upsert(
        &self,
        s: &mut dyn LocalStore,
        schema: &EntitySchema,
        remote: &Record,
    ) -> std::result::Result<Reconciled, StorageError> {
        let entity_type = schema.entity_type.as_str();
        let Some(local) = s.get_record(entity_type, &remote.id)? else {
            s.put_record(entity_type, StoredRecord::synced(remote.clone()))?;
            return Ok(Reconciled::Applied);
        };

        let same_content = !local.deleted
            && content_hash(&remote_view(schema, &local.record)) == content_hash(remote);
        let incoming = keep_local_only(schema, &local.record, remote);

        if !local.is_pending() {
            if same_content {
                return Ok(Reconciled::Unchanged);
            }
            s.put_record(entity_type, StoredRecord::synced(incoming))?;
            return Ok(Reconciled::Applied);
        }

        let history = s.list_queue(&QueueFilter::for_record(entity_type, &remote.id))?;
        // Our own earlier push coming back is not a concurrent change.
        let echo = history.iter().any(|item| {
            item.status == QueueStatus::Completed && item.payload.updated_at == remote.updated_at
        });
        if same_content || echo {
            return Ok(Reconciled::Unchanged);
        }

        let winner = resolve(
            self.options.merge_strategy,
            &local,
            RemoteVersion::Updated(remote.updated_at),
        );
        if winner == Winner::Remote {
            let batch = supersede(&history, WriteBatch::new())
                .put_record(entity_type, StoredRecord::synced(incoming));
            s.commit(batch)?;
        }
        Ok(Reconciled::Conflict(winner))
    }

    fn apply_delete(
        &self,
        s: &mut dyn LocalStore,
        entity_type: &str,
        id: &str,
        deleted_at: Option<i64>,
    ) -> std::result::Result<Reconciled, StorageError> {
        let Some(local) = s.get_record(entity_type, id)? else {
            return Ok(Reconciled::Unchanged);
        };

        if !local.is_pending() {
            s.delete_record(entity_type, id)?;
            return Ok(Reconciled::Applied);
        }

        let history = s.list_queue(&QueueFilter::for_record(entity_type, id))?;

        // Deleted on both sides: converge without calling it a conflict.
        if local.deleted {
            let batch = supersede(&history, WriteBatch::new()).delete_record(entity_type, id);
            s.commit(batch)?;
            return Ok(Reconciled::Applied);
        }

        let winner = resolve(
            self.options.merge_strategy,
            &local,
            RemoteVersion::Deleted(deleted_at),
        );
        if winner == Winner::Remote {
            let batch = supersede(&history, WriteBatch::new()).delete_record(entity_type, id);
            s.commit(batch)?;
        }
        Ok(Reconciled::Conflict(winner))
    }

    /// Record a conflict in the bounded log and persist the log, so later
    /// processes (`osync status`) still report it.
    fn log_conflict(&self, entity_type: &str, id: &str, winner: Winner) -> Result<()> {
        let kept = match winner {
            Winner::Local => "local",
            Winner::Remote => "remote",
        };
        warn!(entity_type, id, kept, "Sync conflict resolved");

        let snapshot: Vec<SyncIssue> = {
            let mut conflicts = lock(&self.conflicts);
            conflicts.push_back(SyncIssue {
                kind: SyncIssueKind::Conflict,
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
                message: format!("local and remote copies both changed; kept {kept} version"),
                at: Utc::now(),
            });
            while conflicts.len() > self.options.conflict_log_limit {
                conflicts.pop_front();
            }
            conflicts.iter().cloned().collect()
        };

        let raw = serde_json::to_string(&snapshot)?;
        self.store
            .with_fallback(|s| s.set_meta(CONFLICT_LOG_KEY, &raw))?;
        Ok(())
    }
}

/// Complete every outstanding item in `history`, marking it superseded.
fn supersede(history: &[SyncQueueItem], mut batch: WriteBatch) -> WriteBatch {
    let now = now_millis();
    for item in history.iter().filter(|item| item.is_outstanding()) {
        let mut item = item.clone();
        item.status = QueueStatus::Completed;
        item.last_error = Some(SUPERSEDED.to_string());
        item.updated_at = now;
        batch = batch.put_queue_item(item);
    }
    batch
}

/// Return every failed item to `pending` with a fresh retry budget.
///
/// Callers that share the store with a running engine should go through
/// [`SyncEngine::retry_failed`] so the requeue never lands mid-pass.
///
/// # Errors
///
/// Returns an error if the queue cannot be updated.
pub fn requeue_failed(store: &SharedStore) -> std::result::Result<usize, StorageError> {
    let now = now_millis();
    let count = store.with_fallback(|s| {
        let failed = s.list_queue(&QueueFilter::with_status(QueueStatus::Failed))?;
        let count = failed.len();
        let mut batch = WriteBatch::new();
        for mut item in failed {
            item.status = QueueStatus::Pending;
            item.retry_count = 0;
            item.last_error = None;
            item.updated_at = now;
            item.next_attempt_at = now;
            batch = batch.put_queue_item(item);
        }
        s.commit(batch)?;
        Ok(count)
    })?;
    info!(count, "Requeued failed items");
    Ok(count)
}

/// Delete completed items last touched before `cutoff` (Unix ms).
///
/// # Errors
///
/// Returns an error if the queue cannot be read or written.
pub fn prune_completed_before(store: &SharedStore, cutoff: i64) -> std::result::Result<usize, StorageError> {
    let pruned = store.with_fallback(|s| {
        let old: Vec<SyncQueueItem> = s
            .list_queue(&QueueFilter::with_status(QueueStatus::Completed))?
            .into_iter()
            .filter(|item| item.updated_at < cutoff)
            .collect();
        let mut batch = WriteBatch::new();
        for item in &old {
            batch = batch.delete_queue_item(&item.id);
        }
        s.commit(batch)?;
        Ok(old.len())
    })?;
    if pruned > 0 {
        debug!(pruned, "Pruned completed queue items");
    }
    Ok(pruned)
}
