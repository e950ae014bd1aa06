//! Sync status computation and display.
//!
//! The status is never persisted: it is recomputed from the queue and the
//! sync metadata every time, then combined with the conflict log.

use chrono::{DateTime, Utc};
use colored::Colorize;

use super::types::ChangeSeq;
use crate::model::{QueueStatus, SyncIndicator, SyncIssue, SyncIssueKind, SyncStatus};
use crate::storage::{QueueFilter, SharedStore, StorageError};

/// Metadata key holding the end time of the last completed pass (RFC3339).
pub const LAST_SYNC_KEY: &str = "last_sync_time";

/// Metadata key holding the pull cursor for one entity type.
#[must_use]
pub fn pull_cursor_key(entity_type: &str) -> String {
    format!("pull_cursor:{entity_type}")
}

/// Metadata key holding the bounded log of recent conflicts (JSON array).
pub const CONFLICT_LOG_KEY: &str = "conflict_log";

/// Parse a pull cursor (the remote's change-feed position).
///
/// Cursors written by older releases as timestamps read as `None`, which
/// makes the next pull start from the beginning of the feed.
#[must_use]
pub fn parse_cursor(value: &str) -> Option<ChangeSeq> {
    value.parse().ok()
}

/// Read the persisted conflict log, oldest first.
///
/// # Errors
///
/// Returns an error if the metadata cannot be read or is not a valid log.
pub fn load_conflict_log(store: &SharedStore) -> Result<Vec<SyncIssue>, StorageError> {
    let Some(raw) = store.with(|s| s.get_meta(CONFLICT_LOG_KEY))? else {
        return Ok(Vec::new());
    };
    serde_json::from_str(&raw).map_err(|e| StorageError::corrupt(CONFLICT_LOG_KEY, e))
}

/// Parse an RFC3339 metadata value.
#[must_use]
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compute the current sync status.
///
/// `conflicts` are appended after the failed items in `errors`.
///
/// # Errors
///
/// Returns an error if the queue or metadata cannot be read.
pub fn get_sync_status(
    store: &SharedStore,
    conflicts: &[SyncIssue],
    is_syncing: bool,
) -> Result<SyncStatus, StorageError> {
    let degraded = store.is_degraded();
    let (counts, pending_by_entity, failed, last_sync) = store.with(|s| {
        Ok::<_, StorageError>((
            s.queue_counts()?,
            s.pending_by_entity()?,
            s.list_queue(&QueueFilter::with_status(QueueStatus::Failed))?,
            s.get_meta(LAST_SYNC_KEY)?,
        ))
    })?;

    let mut errors: Vec<SyncIssue> = failed
        .into_iter()
        .map(|item| SyncIssue {
            kind: SyncIssueKind::Failed,
            message: format!(
                "{} failed after {} attempts: {}",
                item.operation,
                item.retry_count,
                item.last_error.as_deref().unwrap_or("unknown error")
            ),
            at: DateTime::from_timestamp_millis(item.updated_at).unwrap_or_default(),
            entity_type: item.entity_type,
            entity_id: item.entity_id,
        })
        .collect();
    errors.extend(conflicts.iter().cloned());

    Ok(SyncStatus {
        is_syncing,
        degraded,
        pending_count: counts.outstanding(),
        completed_count: counts.completed,
        failed_count: counts.failed,
        pending_by_entity,
        last_sync_time: last_sync.as_deref().and_then(parse_time),
        errors,
    })
}

fn indicator_label(indicator: SyncIndicator) -> colored::ColoredString {
    match indicator {
        SyncIndicator::Offline => "offline".dimmed(),
        SyncIndicator::Syncing => "syncing".cyan(),
        SyncIndicator::Error => "error".red(),
        SyncIndicator::Pending => "pending".yellow(),
        SyncIndicator::Synced => "synced".green(),
    }
}

/// Print sync status to stdout in a human-readable format.
///
/// `is_online` is `None` when sync is disabled (no remote configured).
pub fn print_status(status: &SyncStatus, is_online: Option<bool>) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    match is_online {
        Some(online) => println!("  State:     {}", indicator_label(status.indicator(online))),
        None => println!("  State:     {}", "local only (sync disabled)".dimmed()),
    }
    if status.degraded {
        println!(
            "  {}",
            "Storage degraded: running in memory, changes will not survive a restart".red()
        );
    }
    match status.last_sync_time {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: {}", "never".dimmed()),
    }
    println!();

    println!("{}", "Queue:".blue().bold());
    println!("  Pending:   {}", status.pending_count);
    println!("  Completed: {}", status.completed_count);
    println!("  Failed:    {}", status.failed_count);

    if !status.pending_by_entity.is_empty() {
        println!();
        println!("{}", "Pending by entity:".yellow().bold());
        for (entity, count) in &status.pending_by_entity {
            println!("  {entity:<12} {count}");
        }
    }

    if !status.errors.is_empty() {
        println!();
        println!("{}", "Issues:".red().bold());
        for issue in &status.errors {
            let kind = match issue.kind {
                SyncIssueKind::Failed => "failed".red(),
                SyncIssueKind::Conflict => "conflict".yellow(),
            };
            println!(
                "  [{kind}] {}/{}: {}",
                issue.entity_type, issue.entity_id, issue.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operation, Record, SyncQueueItem};
    use crate::storage::{LocalStore, MemoryStore};
    use serde_json::Map;

    #[test]
    fn test_status_counts_and_failures() {
        let mut store = MemoryStore::new();
        store.ensure_entity("notes").unwrap();
        let pending = SyncQueueItem::new("notes", Operation::Create, Record::new("a", 1, Map::new()));
        let mut failed =
            SyncQueueItem::new("notes", Operation::Update, Record::new("b", 1, Map::new()));
        failed.status = QueueStatus::Failed;
        failed.retry_count = 3;
        failed.last_error = Some("boom".into());
        store.put_queue_item(pending).unwrap();
        store.put_queue_item(failed).unwrap();
        store.set_meta(LAST_SYNC_KEY, "2024-06-10T06:13:20.123Z").unwrap();

        let shared = SharedStore::new(store);
        let status = get_sync_status(&shared, &[], false).unwrap();

        assert_eq!(status.pending_count, 1);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.pending_by_entity.get("notes"), Some(&1));
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.errors[0].entity_id, "b");
        assert!(status.errors[0].message.contains("boom"));
        assert_eq!(
            status.last_sync_time.unwrap().timestamp_millis(),
            1_718_000_000_123
        );
        assert_eq!(status.indicator(true), SyncIndicator::Error);
    }

    #[test]
    fn test_conflict_log_reads_back() {
        let shared = SharedStore::new(MemoryStore::new());
        assert!(load_conflict_log(&shared).unwrap().is_empty());

        let issue = SyncIssue {
            kind: SyncIssueKind::Conflict,
            entity_type: "notes".into(),
            entity_id: "n1".into(),
            message: "kept remote version".into(),
            at: DateTime::from_timestamp_millis(1_718_000_000_123).unwrap(),
        };
        let raw = serde_json::to_string(&vec![issue.clone()]).unwrap();
        shared.with(|s| s.set_meta(CONFLICT_LOG_KEY, &raw)).unwrap();
        assert_eq!(load_conflict_log(&shared).unwrap(), vec![issue]);

        shared.with(|s| s.set_meta(CONFLICT_LOG_KEY, "not json")).unwrap();
        assert!(matches!(
            load_conflict_log(&shared),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("42"), Some(42));
        assert_eq!(parse_cursor("2024-06-10T06:13:20.123Z"), None);
    }
}
