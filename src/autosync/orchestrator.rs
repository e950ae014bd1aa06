//! Background task that decides when sync passes run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Connectivity;
use crate::error::{Error, Result};
use crate::model::SyncStatus;
use crate::sync::{PassReport, RemoteStore, SyncEngine};

/// When the orchestrator syncs on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoSyncOptions {
    /// Run passes on the interval and after local changes.
    pub enabled: bool,
    pub sync_interval: Duration,
    /// How often the published status snapshot is refreshed.
    pub status_poll_interval: Duration,
}

impl Default for AutoSyncOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: Duration::from_secs(30),
            status_poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Enable,
    Disable,
    Shutdown,
}

/// Entry point for starting the orchestrator.
pub struct AutoSync;

impl AutoSync {
    /// Start the orchestrator on the current tokio runtime.
    ///
    /// Passes run on the interval while online and enabled, immediately on
    /// every offline → online transition (even when disabled), and soon
    /// after a local change when `changes` is poked. Ticks that arrive while
    /// a pass is in flight are skipped.
    pub fn spawn<R: RemoteStore + 'static>(
        engine: Arc<SyncEngine<R>>,
        connectivity: &Connectivity,
        changes: Option<Arc<Notify>>,
        options: AutoSyncOptions,
    ) -> AutoSyncHandle<R> {
        let enabled = Arc::new(AtomicBool::new(options.enabled));
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(engine.status().unwrap_or_default());
        let status_tx = Arc::new(status_tx);

        let worker = Worker {
            engine: engine.clone(),
            online: connectivity.subscribe(),
            changes,
            enabled: enabled.clone(),
            status: status_tx.clone(),
            passes: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(options, commands_rx));

        info!(enabled = enabled.load(Ordering::Relaxed), "Auto-sync started");

        AutoSyncHandle {
            engine,
            connectivity: connectivity.clone(),
            enabled,
            commands: commands_tx,
            status_tx,
            status_rx,
            task,
        }
    }
}

/// Control surface for a running orchestrator.
pub struct AutoSyncHandle<R> {
    engine: Arc<SyncEngine<R>>,
    connectivity: Connectivity,
    enabled: Arc<AtomicBool>,
    commands: mpsc::Sender<Command>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    status_rx: watch::Receiver<SyncStatus>,
    task: JoinHandle<()>,
}

impl<R: RemoteStore + 'static> AutoSyncHandle<R> {
    /// Run a pass now, or join the one in flight.
    ///
    /// # Errors
    ///
    /// Returns `Error::Offline` while offline, otherwise whatever the pass
    /// returns.
    pub async fn trigger_sync(&self) -> Result<PassReport> {
        if !self.connectivity.is_online() {
            return Err(Error::Offline);
        }
        let report = self.engine.sync_now().await;
        publish_status(&self.engine, &self.status_tx);
        report
    }

    pub fn enable_auto_sync(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            info!("Auto-sync enabled");
            self.send(Command::Enable);
        }
    }

    pub fn disable_auto_sync(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            info!("Auto-sync disabled");
            self.send(Command::Disable);
        }
    }

    #[must_use]
    pub fn is_auto_sync_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Latest published status snapshot.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that changes whenever a new snapshot is published.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Stop the orchestrator, waiting for any pass it started.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Auto-sync task ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        // A full channel only drops a redundant command; the flag is already set.
        if let Err(e) = self.commands.try_send(command) {
            debug!(?command, error = %e, "Auto-sync command not delivered");
        }
    }
}

fn publish_status<R: RemoteStore>(engine: &SyncEngine<R>, status: &watch::Sender<SyncStatus>) {
    match engine.status() {
        Ok(snapshot) => {
            status.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
        }
        Err(e) => warn!(error = %e, "Could not refresh sync status"),
    }
}

async fn local_change(changes: Option<&Notify>) {
    match changes {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

struct Worker<R> {
    engine: Arc<SyncEngine<R>>,
    online: watch::Receiver<bool>,
    changes: Option<Arc<Notify>>,
    enabled: Arc<AtomicBool>,
    status: Arc<watch::Sender<SyncStatus>>,
    passes: JoinSet<()>,
}

impl<R: RemoteStore + 'static> Worker<R> {
    async fn run(mut self, options: AutoSyncOptions, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = interval_at(Instant::now() + options.sync_interval, options.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = interval(options.status_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut was_online = *self.online.borrow_and_update();
        let changes = self.changes.clone();

        loop {
            while self.passes.try_join_next().is_some() {}

            tokio::select! {
                _ = ticker.tick() => {
                    if self.enabled() && was_online {
                        self.start_pass("interval");
                    }
                }
                changed = self.online.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity publisher dropped");
                        break;
                    }
                    let online = *self.online.borrow_and_update();
                    if online && !was_online {
                        info!("Back online, syncing");
                        self.start_pass("reconnect");
                    }
                    was_online = online;
                }
                () = local_change(changes.as_deref()) => {
                    if self.enabled() && was_online {
                        self.start_pass("local change");
                    }
                }
                _ = poll.tick() => publish_status(&self.engine, &self.status),
                command = commands.recv() => match command {
                    Some(Command::Enable) => ticker.reset(),
                    Some(Command::Disable) => {}
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        while self.passes.join_next().await.is_some() {}
        publish_status(&self.engine, &self.status);
        info!("Auto-sync stopped");
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Start a pass in the background unless one is already running.
    fn start_pass(&mut self, trigger: &'static str) {
        if self.engine.is_syncing() {
            debug!(trigger, "Pass in flight, skipping trigger");
            return;
        }
        let engine = self.engine.clone();
        let status = self.status.clone();
        self.passes.spawn(async move {
            debug!(trigger, "Starting sync pass");
            match engine.try_sync().await {
                Some(Err(e)) => warn!(trigger, error = %e, "Sync pass failed"),
                Some(Ok(_)) => {}
                None => debug!(trigger, "Pass already in flight"),
            }
            publish_status(&engine, &status);
        });
    }
}
