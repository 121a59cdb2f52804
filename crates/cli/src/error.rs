//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An input file does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// An input file is not valid JSON for the expected shape.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An error occurred in the ledger layer.
    #[error(transparent)]
    Ledger(#[from] ledger::Error),

    /// An error occurred in the policy layer.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    /// Output could not be rendered.
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
