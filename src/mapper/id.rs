//! Client-side record identifiers.
//!
//! Ids are generated on the device so that a record has the same identity
//! locally and remotely from the moment it is created, even when offline.

/// Longest accepted record id.
pub const MAX_ID_LEN: usize = 128;

/// Generate a new globally unique record id (UUID v4, hyphenated lowercase).
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check whether a caller-supplied id can be used as a record id.
///
/// Ids must be non-empty, at most [`MAX_ID_LEN`] bytes, and free of
/// whitespace, control characters and `/` (ids appear in remote URLs).
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/')
}
