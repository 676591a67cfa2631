pub mod config;
pub mod report;
pub mod run;
pub mod settings;
pub mod targets;

use crate::config::{load_config, Config, ConfigError};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::traits::StorageError;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(
        "config not found\nSearched locations:\n  ~/.config/log-sender/config.yml\n  /etc/log-sender/config.yml\n\nUse --config <path> to specify a config file, or run 'log-sender config init' to generate one."
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub(crate) fn load(config_path: Option<&Path>) -> Result<Config, CliError> {
    let path: &Path = config_path.ok_or(CliError::ConfigNotFound)?;
    info!(config_path = %path.display(), "Loading configuration");
    Ok(load_config(path)?)
}

/// Opens the database named by the config and makes sure its tables exist.
pub(crate) async fn open_storage(config: &Config) -> Result<Arc<DuckDbStorage>, CliError> {
    info!(path = %config.storage.path.display(), "Opening storage");
    let storage =
        DuckDbStorage::new(&config.storage.path)?.with_site_url(config.platform.site_url.clone());
    storage.init_schema().await?;
    Ok(Arc::new(storage))
}
