//! Error types for the offline sync layer.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, etc.)
//! - Retryability flags for callers that want to try again
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::mapper::MappingError;
use crate::storage::StorageError;
use crate::sync::RemoteError;

/// Result type alias for offline sync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    StorageQuotaExceeded,
    StorageUnavailable,

    // Not Found (exit 3)
    RecordNotFound,
    QueueItemNotFound,
    UnknownEntity,

    // Validation (exit 4)
    RecordExists,
    InvalidSchema,
    FieldCollision,
    InvalidValue,
    InvalidArgument,

    // Sync (exit 6)
    RemoteError,
    SyncDisabled,
    SyncFailed,
    Offline,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::StorageQuotaExceeded => "STORAGE_QUOTA_EXCEEDED",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::QueueItemNotFound => "QUEUE_ITEM_NOT_FOUND",
            Self::UnknownEntity => "UNKNOWN_ENTITY",
            Self::RecordExists => "RECORD_EXISTS",
            Self::InvalidSchema => "INVALID_SCHEMA",
            Self::FieldCollision => "FIELD_COLLISION",
            Self::InvalidValue => "INVALID_VALUE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::SyncDisabled => "SYNC_DISABLED",
            Self::SyncFailed => "SYNC_FAILED",
            Self::Offline => "OFFLINE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::StorageQuotaExceeded
            | Self::StorageUnavailable => 2,
            Self::RecordNotFound | Self::QueueItemNotFound | Self::UnknownEntity => 3,
            Self::RecordExists
            | Self::InvalidSchema
            | Self::FieldCollision
            | Self::InvalidValue
            | Self::InvalidArgument => 4,
            Self::RemoteError | Self::SyncDisabled | Self::SyncFailed | Self::Offline => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether retrying the same call later can succeed.
    ///
    /// True for transient conditions (offline, remote failures, a busy
    /// database). False for validation and not-found errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError
                | Self::StorageUnavailable
                | Self::RemoteError
                | Self::SyncFailed
                | Self::Offline
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors surfaced by the offline sync layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `osync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Record not found: {entity_type}/{id}")]
    RecordNotFound { entity_type: String, id: String },

    #[error("Record already exists: {entity_type}/{id}")]
    RecordExists { entity_type: String, id: String },

    #[error("Queue item not found: {id}")]
    QueueItemNotFound { id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Sync is disabled: no remote datastore configured")]
    SyncDisabled,

    /// A pass this call waited on ended in an error.
    #[error("Sync pass failed: {0}")]
    PassFailed(String),

    #[error("Device is offline")]
    Offline,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::RecordExists { .. } => ErrorCode::RecordExists,
            Self::QueueItemNotFound { .. } => ErrorCode::QueueItemNotFound,
            Self::Storage(e) => match e {
                StorageError::QuotaExceeded(_) => ErrorCode::StorageQuotaExceeded,
                StorageError::Unavailable(_) => ErrorCode::StorageUnavailable,
                StorageError::UnknownEntity(_) => ErrorCode::UnknownEntity,
                StorageError::InvalidEntityType(_) => ErrorCode::InvalidArgument,
                StorageError::Corrupt { .. } | StorageError::Sqlite(_) => ErrorCode::DatabaseError,
            },
            Self::Mapping(e) => match e {
                MappingError::UnknownEntity(_) => ErrorCode::UnknownEntity,
                MappingError::InvalidSchema(_) => ErrorCode::InvalidSchema,
                MappingError::FieldCollision { .. } => ErrorCode::FieldCollision,
                MappingError::MissingField { .. } | MappingError::InvalidValue { .. } => {
                    ErrorCode::InvalidValue
                }
            },
            Self::Remote(_) => ErrorCode::RemoteError,
            Self::SyncDisabled => ErrorCode::SyncDisabled,
            Self::PassFailed(_) => ErrorCode::SyncFailed,
            Self::Offline => ErrorCode::Offline,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `osync init` to create the local store".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Local store already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::RecordNotFound { entity_type, .. } => Some(format!(
                "Use `osync list {entity_type}` to see the records stored on this device."
            )),

            Self::RecordExists { entity_type, id } => Some(format!(
                "Use `osync update {entity_type} {id} --data '{{...}}'` to change it instead."
            )),

            Self::Mapping(MappingError::UnknownEntity(_))
            | Self::Storage(StorageError::UnknownEntity(_)) => Some(
                "Register the entity type in the `entities` section of the config file."
                    .to_string(),
            ),

            Self::Storage(StorageError::QuotaExceeded(_)) => Some(
                "Free disk space or run `osync prune` to drop completed queue items.".to_string(),
            ),

            Self::SyncDisabled => Some(
                "Pass `--remote <URL>` or set OSYNC_REMOTE_URL to enable synchronization."
                    .to_string(),
            ),

            Self::Offline => Some(
                "Local changes are kept in the queue and will be pushed once online.".to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("status") {
                    Some("Valid queue statuses: pending, processing, completed, failed".to_string())
                } else if msg.contains("--data") {
                    Some("Record data must be a JSON object, e.g. --data '{\"title\":\"Kyoto\"}'".to_string())
                } else {
                    None
                }
            }

            Self::QueueItemNotFound { .. }
            | Self::Storage(_)
            | Self::Mapping(_)
            | Self::Remote(_)
            | Self::PassFailed(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_storage_codes() {
        let err = Error::from(StorageError::QuotaExceeded("disk full".into()));
        assert_eq!(err.error_code(), ErrorCode::StorageQuotaExceeded);
        assert_eq!(err.exit_code(), 2);

        let err = Error::from(StorageError::Unavailable("read-only".into()));
        assert!(err.error_code().is_retryable());
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let err = Error::RecordNotFound {
            entity_type: "tours".into(),
            id: "abc".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "RECORD_NOT_FOUND");
        assert_eq!(json["error"]["exit_code"], 3);
        assert!(json["error"]["hint"].as_str().unwrap().contains("osync list tours"));
    }

    #[test]
    fn test_offline_is_retryable_sync_error() {
        assert_eq!(Error::Offline.exit_code(), 6);
        assert!(ErrorCode::Offline.is_retryable());
        assert!(!ErrorCode::RecordNotFound.is_retryable());
    }
}
