//! Error types for LandWatch

use thiserror::Error;

/// Result type alias for LandWatch operations
pub type Result<T> = std::result::Result<T, LandwatchError>;

/// Main error type for LandWatch
#[derive(Error, Debug)]
pub enum LandwatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Invalid snapshot date: {0}")]
    InvalidSnapshotDate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
