//! Conflict resolution between a locally pending record and a remote change.
//!
//! A conflict exists only when the local copy has unpushed changes; a clean
//! local copy is simply overwritten by the remote version.

use serde::{Deserialize, Serialize};

use crate::model::StoredRecord;

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Last writer wins by `updated_at`; ties go to the remote copy. A
    /// pending local delete beats a remote update.
    #[default]
    PreferNewer,
    /// Always keep the local version.
    PreferLocal,
    /// Always take the remote version.
    PreferRemote,
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer_newer" | "newer" => Ok(Self::PreferNewer),
            "prefer_local" | "local" => Ok(Self::PreferLocal),
            "prefer_remote" | "remote" => Ok(Self::PreferRemote),
            _ => Err(format!("Unknown merge strategy: {s}")),
        }
    }
}

/// The remote side of a conflict, already in local naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteVersion {
    /// Remote row updated at this time (Unix ms).
    Updated(i64),
    /// Remote row deleted; deletion time if the remote reports one.
    Deleted(Option<i64>),
}

/// Which copy survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Decide a conflict between a pending local record and a remote change.
#[must_use]
pub fn resolve(strategy: MergeStrategy, local: &StoredRecord, remote: RemoteVersion) -> Winner {
    match strategy {
        MergeStrategy::PreferLocal => Winner::Local,
        MergeStrategy::PreferRemote => Winner::Remote,
        MergeStrategy::PreferNewer => prefer_newer(local, remote),
    }
}

fn prefer_newer(local: &StoredRecord, remote: RemoteVersion) -> Winner {
    let local_at = local.record.updated_at;
    match remote {
        // Both sides deleted: nothing to keep locally.
        RemoteVersion::Deleted(_) if local.deleted => Winner::Remote,
        RemoteVersion::Updated(_) if local.deleted => Winner::Local,
        RemoteVersion::Updated(remote_at) => later_wins(local_at, remote_at),
        RemoteVersion::Deleted(Some(deleted_at)) => later_wins(local_at, deleted_at),
        RemoteVersion::Deleted(None) => Winner::Remote,
    }
}

fn later_wins(local_at: i64, remote_at: i64) -> Winner {
    if local_at > remote_at {
        Winner::Local
    } else {
        Winner::Remote
    }
}
