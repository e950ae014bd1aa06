//! Initialize the local database.
//!
//! Creates `~/.offline-sync/data/offline.db` (or the `--db` path), applies
//! the schema and creates a record table for every configured entity type.

use crate::cli::commands::Context;
use crate::error::{Error, Result};
use crate::storage::{LocalStore, SqliteStore};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    entity_types: Vec<String>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` unless `force` is set, or an error if the
/// database cannot be created.
pub fn execute(ctx: &Context, force: bool) -> Result<()> {
    let db_path = &ctx.db_path;
    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized {
                path: db_path.clone(),
            });
        }
        fs::remove_file(db_path)?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let registry = ctx.config.build_registry()?;
    let mut store = SqliteStore::open(db_path)?;
    for entity_type in registry.entity_types() {
        store.ensure_entity(entity_type)?;
    }
    let entity_types = store.entity_types();

    if ctx.json {
        let output = InitOutput {
            database: db_path.clone(),
            entity_types,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized local store");
        println!("  Database: {}", db_path.display());
        println!("  Entities: {}", entity_types.join(", "));
        println!();
        if ctx.config.remote_url.is_none() {
            println!("No remote configured: running local-only. Set OSYNC_REMOTE_URL to enable sync.");
        }
    }

    Ok(())
}
