//! Content hashing for change detection.
//!
//! Hashing the serialized JSON of a record lets the pull phase skip remote
//! rows that are identical to the local copy without comparing every field.
//! Object keys serialize in sorted order, so equal records hash equally.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute a SHA256 hash of a serializable value.
///
/// A value that fails to serialize hashes as the empty input.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    format!("{:x}", hasher.finalize())
}

/// Check if content has changed relative to a stored hash.
///
/// Returns `true` if there is no stored hash or the hashes differ.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}
