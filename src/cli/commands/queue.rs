//! Queue command implementations (queue, retry-failed, prune).

use crate::cli::commands::Context;
use crate::cli::QueueArgs;
use crate::error::{Error, Result};
use crate::model::{now_millis, QueueStatus, SyncQueueItem};
use crate::storage::{LocalStore, QueueFilter};
use crate::sync::{prune_completed_before, requeue_failed};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct QueueOutput {
    count: usize,
    items: Vec<SyncQueueItem>,
}

/// Execute `osync queue`.
///
/// # Errors
///
/// Returns an error for an unknown status or if the queue cannot be read.
pub fn list(ctx: &Context, args: &QueueArgs) -> Result<()> {
    let mut filter = QueueFilter::all().limit(args.limit);
    if let Some(status) = &args.status {
        let status = status.parse::<QueueStatus>().map_err(Error::InvalidArgument)?;
        filter = filter.status(status);
    }
    filter.entity_type.clone_from(&args.entity);

    let manager = ctx.manager()?;
    let items = manager.store().with(|s| s.list_queue(&filter))?;

    if ctx.json {
        let output = QueueOutput {
            count: items.len(),
            items,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<10}  {:<6}  {:<10}  {:<36}  {}",
        "SEQ", "STATUS", "OP", "ENTITY", "ID", "RETRIES"
    );
    for item in &items {
        let status = match item.status {
            QueueStatus::Pending => item.status.as_str().yellow(),
            QueueStatus::Processing => item.status.as_str().cyan(),
            QueueStatus::Completed => item.status.as_str().green(),
            QueueStatus::Failed => item.status.as_str().red(),
        };
        println!(
            "{:>5}  {:<10}  {:<6}  {:<10}  {:<36}  {}",
            item.seq,
            status,
            item.operation.as_str(),
            item.entity_type,
            item.entity_id,
            item.retry_count
        );
        if let Some(error) = &item.last_error {
            println!("       {}", error.dimmed());
        }
    }
    Ok(())
}

/// Execute `osync retry-failed`.
///
/// # Errors
///
/// Returns an error if the queue cannot be updated.
pub fn retry_failed(ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let count = requeue_failed(manager.store())?;

    if ctx.json {
        println!("{}", serde_json::json!({ "requeued": count }));
    } else if count == 0 {
        println!("No failed items.");
    } else {
        println!("Requeued {count} failed item(s); they will be retried on the next sync.");
    }
    Ok(())
}

/// Execute `osync prune`.
///
/// # Errors
///
/// Returns an error if the queue cannot be updated.
pub fn prune(ctx: &Context, older_than_hours: Option<u64>) -> Result<()> {
    let hours = older_than_hours.unwrap_or(ctx.config.completed_retention_hours);
    let retention_ms = i64::try_from(hours.saturating_mul(3_600_000)).unwrap_or(i64::MAX);
    let cutoff = now_millis().saturating_sub(retention_ms);

    let manager = ctx.manager()?;
    let pruned = prune_completed_before(manager.store(), cutoff)?;

    if ctx.json {
        println!("{}", serde_json::json!({ "pruned": pruned, "older_than_hours": hours }));
    } else {
        println!("Pruned {pruned} completed item(s) older than {hours}h.");
    }
    Ok(())
}
