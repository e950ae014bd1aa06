//! `osync daemon`: auto-sync until interrupted.
//!
//! Connectivity is checked against the remote's health endpoint; the
//! orchestrator syncs on the interval while online and right after the
//! remote comes back.

use std::sync::Arc;
use std::time::Duration;

use crate::autosync::{AutoSync, Connectivity};
use crate::cli::commands::{runtime, Context};
use crate::error::Result;
use crate::model::SyncStatus;
use crate::sync::HttpRemote;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Execute the daemon command.
///
/// # Errors
///
/// Returns `SyncDisabled` without a remote, or an error if the runtime or
/// local store cannot be set up.
pub fn execute(ctx: &Context, health_interval: u64) -> Result<()> {
    let manager = ctx.manager()?;
    let engine = Arc::new(ctx.engine(&manager)?);
    let health_interval = Duration::from_secs(health_interval.max(1));
    let json = ctx.json;
    let options = ctx.config.auto_sync_options();

    let rt = runtime()?;
    rt.block_on(async move {
        let health_remote = engine.remote().clone();
        let connectivity = Connectivity::new(health_remote.check_health().await);
        let handle = AutoSync::spawn(engine.clone(), &connectivity, None, options);

        let health_task = tokio::spawn(health_loop(health_remote, connectivity.clone(), health_interval));

        if !json {
            println!(
                "Syncing with {} ({}). Press Ctrl-C to stop.",
                engine.remote().base_url(),
                if connectivity.is_online() { "online" } else { "offline" }
            );
        }

        let mut updates = handle.subscribe_status();
        let mut online = connectivity.subscribe();
        print_update(&handle.status(), connectivity.is_online(), json);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = updates.borrow_and_update().clone();
                    print_update(&status, connectivity.is_online(), json);
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    print_update(&handle.status(), is_online, json);
                }
            }
        }

        info!("Shutting down");
        health_task.abort();
        handle.shutdown().await;
    });

    Ok(())
}

async fn health_loop(remote: HttpRemote, connectivity: Connectivity, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        connectivity.set_online(remote.check_health().await);
    }
}

fn print_update(status: &SyncStatus, is_online: bool, json: bool) {
    if json {
        let line = serde_json::json!({
            "indicator": status.indicator(is_online),
            "pending": status.pending_count,
            "failed": status.failed_count,
            "last_sync_time": status.last_sync_time,
        });
        println!("{line}");
    } else {
        println!(
            "[{}] pending {}, failed {}",
            status.indicator(is_online),
            status.pending_count,
            status.failed_count
        );
    }
}
