pub mod build;
pub mod reprice;
pub mod setup;
pub mod show;
pub mod ui;

use crate::core::config::AppConfig;
use crate::store::{KeyValueStore, RecordStore};
use anyhow::Result;
use tracing::debug;

/// Opens the record store under the configured data directory.
pub fn open_store(config: &AppConfig) -> Result<RecordStore> {
    let path = config.default_data_path()?;
    debug!("Using data directory {}", path.display());
    Ok(RecordStore::new(KeyValueStore::open(&path)?))
}
