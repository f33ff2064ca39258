//! CLI error type.

use lalantsika_store::StoreError;
use lalantsika_sync::SyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Failures that stop a command before or while it runs.
#[derive(Error, Debug)]
pub enum CliError {
    /// A required option is missing.
    #[error("{0} is required")]
    Missing(&'static str),

    /// The configuration file could not be loaded.
    #[error("cannot load config {path:?}: {message}")]
    Config {
        /// Config file path.
        path: PathBuf,
        /// Reason.
        message: String,
    },

    /// The data directory could not be opened or locked.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A sync run aborted.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Setup failed.
    #[error("{0}")]
    Setup(String),

    /// Output could not be written.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}
