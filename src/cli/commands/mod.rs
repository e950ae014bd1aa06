//! Command implementations.
//!
//! Every command that touches data goes through [`Context`], which resolves
//! the config and database path once and wires up the components.

pub mod completions;
pub mod config;
pub mod daemon;
pub mod init;
pub mod queue;
pub mod records;
pub mod sync;
pub mod version;

use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::Cli;
use crate::config::{resolve_db_path, SyncConfig};
use crate::error::{Error, Result};
use crate::offline::OfflineManager;
use crate::sync::{HttpRemote, SyncEngine};

/// Resolved settings shared by the data commands.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: SyncConfig,
    pub db_path: PathBuf,
    pub json: bool,
}

impl Context {
    /// Resolve config (file, env, then `--remote`) and the database path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a bad config, or `NotInitialized` if no
    /// database location can be determined.
    pub fn load(cli: &Cli, json: bool) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => SyncConfig::load_from(path)?,
            None => SyncConfig::load()?,
        };
        if let Some(remote) = &cli.remote {
            config.remote_url = Some(remote.clone());
        }

        let db_path = resolve_db_path(cli.db.as_deref()).ok_or(Error::NotInitialized)?;
        Ok(Self {
            config,
            db_path,
            json,
        })
    }

    /// Open the offline manager over the initialized database.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if `osync init` has not been run.
    pub fn manager(&self) -> Result<OfflineManager> {
        if !self.db_path.exists() {
            return Err(Error::NotInitialized);
        }
        let registry = Arc::new(self.config.build_registry()?);
        OfflineManager::open(&self.db_path, registry)
    }

    /// The configured HTTP remote, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn remote(&self) -> Result<Option<HttpRemote>> {
        self.config
            .remote_url
            .as_deref()
            .map(|url| HttpRemote::new(url, self.config.request_timeout()))
            .transpose()
            .map_err(Error::from)
    }

    /// A sync engine over `manager`'s store.
    ///
    /// # Errors
    ///
    /// Returns `SyncDisabled` when no remote is configured.
    pub fn engine(&self, manager: &OfflineManager) -> Result<SyncEngine<HttpRemote>> {
        let remote = self.remote()?.ok_or(Error::SyncDisabled)?;
        Ok(SyncEngine::new(
            manager.store().clone(),
            manager.registry().clone(),
            remote,
            self.config.sync_options(),
        ))
    }
}

/// Build a runtime for commands that talk to the remote.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
