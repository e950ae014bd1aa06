//! Synchronization between the local store and the remote datastore.
//!
//! This module provides:
//!
//! - **Push**: queued mutations → remote, in append order, with retries
//! - **Pull**: remote changes after the last feed position → local store
//! - **Conflicts**: merge strategies for records changed on both sides
//! - **Status**: queue counts, last sync time and recent issues
//!
//! # Architecture
//!
//! Every local write appends a [`SyncQueueItem`](crate::model::SyncQueueItem).
//! A pass drains pending items in `seq` order, marking each `processing`,
//! then `completed` or back to `pending` with a backoff, and finally
//! `failed` after `max_retries` attempts. Once the push is done the pass
//! pulls each entity's remote changes and reconciles them record by record.
//!
//! # Example
//!
//! ```ignore
//! use offline_sync::sync::{HttpRemote, SyncEngine, SyncOptions};
//!
//! let remote = HttpRemote::new("https://api.example.com", Duration::from_secs(10))?;
//! let engine = SyncEngine::new(store, registry, remote, SyncOptions::default());
//! let report = engine.sync_now().await?;
//! println!("{}", report.summary());
//! ```

mod conflict;
mod engine;
mod hash;
mod remote;
mod status;
mod types;

pub use conflict::{resolve, MergeStrategy, RemoteVersion, Winner};
pub use engine::{prune_completed_before, requeue_failed, SyncEngine, SyncOptions, SUPERSEDED};
pub use hash::{content_hash, has_changed};
pub use remote::{HttpRemote, MemoryRemote, RemoteCall, RemoteStore};
pub use status::{
    get_sync_status, load_conflict_log, parse_cursor, parse_time, print_status, pull_cursor_key,
    CONFLICT_LOG_KEY, LAST_SYNC_KEY,
};
pub use types::{ChangeSeq, PassReport, RemoteChange, RemoteError, SyncPhase};
