//! Configuration management.
//!
//! This module provides functions for locating the offline-sync home
//! directory, resolving the database path, and loading [`SyncConfig`].
//!
//! # Resolution
//!
//! Settings are layered, later layers winning:
//! 1. Built-in defaults
//! 2. `~/.offline-sync/config.json`
//! 3. `OSYNC_*` environment variables
//! 4. CLI flags (applied by the caller)

mod entities;

pub use entities::{default_entities, DEFAULT_ENTITY_TYPES};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::autosync::AutoSyncOptions;
use crate::error::{Error, Result};
use crate::mapper::{EntitySchema, SchemaRegistry};
use crate::sync::{MergeStrategy, SyncOptions};

/// Tunables for the sync layer.
///
/// Durations are stored as whole seconds (or milliseconds where noted) so
/// the JSON file stays hand-editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enable_auto_sync: bool,
    pub sync_interval_secs: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub retry_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub completed_retention_hours: u64,
    pub status_poll_interval_ms: u64,
    /// `None` runs in local-only mode.
    pub remote_url: Option<String>,
    pub request_timeout_secs: u64,
    pub conflict_log_limit: usize,
    pub merge_strategy: MergeStrategy,
    /// Entity schemas keyed by entity type. Empty means the built-in set.
    pub entities: BTreeMap<String, EntitySchema>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_auto_sync: true,
            sync_interval_secs: 30,
            batch_size: 50,
            max_retries: 3,
            retry_backoff_secs: 2,
            max_backoff_secs: 300,
            completed_retention_hours: 7 * 24,
            status_poll_interval_ms: 1000,
            remote_url: None,
            request_timeout_secs: 10,
            conflict_log_limit: 100,
            merge_strategy: MergeStrategy::PreferNewer,
            entities: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load from the default config file (if any) and the environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is malformed or a value is out of range.
    pub fn load() -> Result<Self> {
        match global_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                let mut config = Self::default();
                config.apply_env()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from `path` (missing file means defaults) and the environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is malformed or a value is out of range.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading config");
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `OSYNC_*` overrides read through `get`.
    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("OSYNC_ENABLE_AUTO_SYNC") {
            self.enable_auto_sync = parse_bool(&v)
                .ok_or_else(|| Error::Config(format!("OSYNC_ENABLE_AUTO_SYNC: not a boolean: {v}")))?;
        }
        if let Some(v) = get("OSYNC_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = parse_env("OSYNC_SYNC_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("OSYNC_BATCH_SIZE") {
            self.batch_size = parse_env("OSYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("OSYNC_MAX_RETRIES") {
            self.max_retries = parse_env("OSYNC_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("OSYNC_REMOTE_URL") {
            let v = v.trim();
            self.remote_url = (!v.is_empty()).then(|| v.to_string());
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::Config("sync_interval_secs must be at least 1".into()));
        }
        if self.status_poll_interval_ms == 0 {
            return Err(Error::Config("status_poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            completed_retention: Duration::from_secs(self.completed_retention_hours * 3600),
            conflict_log_limit: self.conflict_log_limit,
            merge_strategy: self.merge_strategy,
        }
    }

    #[must_use]
    pub fn auto_sync_options(&self) -> AutoSyncOptions {
        AutoSyncOptions {
            enabled: self.enable_auto_sync,
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the schema registry from `entities`, or the built-in set.
    ///
    /// # Errors
    ///
    /// Returns a mapping error if a configured schema is invalid, or
    /// `Error::Config` if a map key disagrees with its schema's entity type.
    pub fn build_registry(&self) -> Result<SchemaRegistry> {
        if self.entities.is_empty() {
            return Ok(default_entities()?);
        }
        let mut registry = SchemaRegistry::new();
        for (key, schema) in &self.entities {
            if key != &schema.entity_type {
                return Err(Error::Config(format!(
                    "entities.{key}: entity_type is '{}'",
                    schema.entity_type
                )));
            }
            registry.register(schema.clone())?;
        }
        Ok(registry)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, v: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid value: {v}")))
}

/// The global offline-sync directory, `~/.offline-sync/`.
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".offline-sync"))
}

/// Default config file location.
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("config.json"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `OSYNC_DB` environment variable
/// 3. Global location: `~/.offline-sync/data/offline.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("OSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_dir().map(|dir| dir.join("data").join("offline.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(config.enable_auto_sync);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert!(config.remote_url.is_none());
        assert_eq!(config.auto_sync_options().sync_interval, Duration::from_secs(30));
        assert_eq!(config.sync_options().retry_backoff, Duration::from_secs(2));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_overrides(env(&[
                ("OSYNC_ENABLE_AUTO_SYNC", "false"),
                ("OSYNC_SYNC_INTERVAL_SECS", "5"),
                ("OSYNC_BATCH_SIZE", "10"),
                ("OSYNC_MAX_RETRIES", "7"),
                ("OSYNC_REMOTE_URL", "http://localhost:8080"),
            ]))
            .unwrap();
        assert!(!config.enable_auto_sync);
        assert_eq!(config.sync_interval_secs, 5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.remote_url.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_overrides(env(&[("OSYNC_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_batch_and_retries() {
        let config = SyncConfig {
            batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = SyncConfig {
            max_retries: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file_with_entities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "batch_size": 5,
                "merge_strategy": "prefer_local",
                "entities": {
                    "tours": {
                        "entity_type": "tours",
                        "remote_name": "travel_tours",
                        "naming": "camel_to_snake",
                        "fields": [{"local": "startsAt", "remote": "start_date", "kind": "timestamp"}]
                    }
                }
            }"#,
        )
        .unwrap();

        let config = SyncConfig::load_from(&path).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.merge_strategy, MergeStrategy::PreferLocal);

        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("tours").unwrap().remote_name, "travel_tours");
    }

    #[test]
    fn test_entity_key_must_match_schema() {
        let mut config = SyncConfig::default();
        config
            .entities
            .insert("tours".into(), EntitySchema::new("orders", "orders"));
        assert!(matches!(config.build_registry(), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SyncConfig::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/offline.db");
        assert_eq!(resolve_db_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_empty_entities_uses_default_registry() {
        let registry = SyncConfig::default().build_registry().unwrap();
        assert_eq!(registry.len(), DEFAULT_ENTITY_TYPES.len());
    }
}
