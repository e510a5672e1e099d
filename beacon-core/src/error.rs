//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Notification client error (Slack, GitHub, mail relay)
    #[error("notification error: {0}")]
    Notification(String),

    /// Insight not found
    #[error("insight not found: {0}")]
    InsightNotFound(String),
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
