//! Sync command implementations (status, sync).
//!
//! `osync sync` runs a single pass in the foreground; `osync daemon` keeps
//! syncing in the background.

use crate::cli::commands::{runtime, Context};
use crate::error::Result;
use crate::sync::{get_sync_status, load_conflict_log, print_status};
use tracing::debug;

/// Execute `osync status`.
///
/// Checks the remote's health (when one is configured) to report connectivity.
/// Conflicts come from the log persisted by earlier sync passes.
///
/// # Errors
///
/// Returns an error if the queue or the conflict log cannot be read.
pub fn status(ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let conflicts = load_conflict_log(manager.store())?;
    let status = get_sync_status(manager.store(), &conflicts, false)?;

    let online = match ctx.remote()? {
        Some(remote) => {
            let rt = runtime()?;
            let online = rt.block_on(remote.check_health());
            debug!(url = remote.base_url(), online, "Checked remote health");
            Some(online)
        }
        None => None,
    };

    if ctx.json {
        let output = serde_json::json!({
            "sync_enabled": online.is_some(),
            "is_online": online,
            "indicator": online.map(|o| status.indicator(o)),
            "status": status,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        print_status(&status, online);
    }
    Ok(())
}

/// Execute `osync sync`: one push/pull pass.
///
/// # Errors
///
/// Returns `SyncDisabled` without a remote, or a storage error from the pass.
/// An unreachable remote is reported, not returned as an error.
pub fn sync(ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let engine = ctx.engine(&manager)?;

    let rt = runtime()?;
    let report = rt.block_on(engine.sync_now())?;
    let status = engine.status()?;

    if ctx.json {
        let output = serde_json::json!({
            "report": report,
            "status": status,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if report.interrupted {
        println!(
            "Sync stopped early: {}",
            report.error.as_deref().unwrap_or("remote unreachable")
        );
        println!("Local changes stay queued and will be pushed once the remote is reachable.");
    } else {
        println!("Sync complete: {}", report.summary());
    }
    if status.failed_count > 0 {
        println!(
            "{} item(s) failed permanently; run `osync queue --status failed` to inspect.",
            status.failed_count
        );
    }
    Ok(())
}
