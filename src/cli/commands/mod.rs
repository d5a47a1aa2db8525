//! Command implementations.

pub mod history;
pub mod init;
pub mod list;
pub mod migrate;
pub mod validate;

use crate::config::{self, CliOverrides, ConfigPaths, MigrationConfig};
use crate::error::Result;
use crate::storage::SqliteStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// An opened workspace: store, resolved paths and typed config.
pub struct Workspace {
    pub store: Arc<SqliteStore>,
    pub paths: ConfigPaths,
    pub config: MigrationConfig,
}

impl Workspace {
    /// Discover and open the workspace above `start` (or the CWD).
    ///
    /// # Errors
    ///
    /// Returns an error if no workspace is found, the store cannot be opened
    /// or configuration is malformed.
    pub fn open(cli: &CliOverrides, start: Option<&Path>) -> Result<Self> {
        let factions_dir = config::discover_factions_dir(start)?;
        let (store, paths) = config::open_store(&factions_dir, cli.db.as_ref())?;
        let layer = config::load_config(&factions_dir, Some(&store), cli)?;
        let config = MigrationConfig::from_layer(&layer)?;
        let store = Arc::new(store.with_max_power(config.max_power));
        tracing::debug!(db = %paths.db_path.display(), "Opened workspace");
        Ok(Self {
            store,
            paths,
            config,
        })
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
