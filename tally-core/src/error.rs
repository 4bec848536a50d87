//! Error types for tally-core

use thiserror::Error;

/// Main error type for the tally-core library
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

    /// An event whose timestamp cannot be parsed
    #[error("malformed event timestamp {value:?}: {reason}")]
    MalformedEvent { value: String, reason: String },

    /// Writing an archive record failed
    #[error("failed to persist {month} archive for {app_id}: {message}")]
    ArchivePersistence {
        app_id: String,
        month: String,
        message: String,
    },

    /// Rejected ingestion or registry input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Remote collection endpoint error
    #[error("client error: {0}")]
    Client(String),
}

/// Result type alias for tally-core
pub type Result<T> = std::result::Result<T, Error>;
