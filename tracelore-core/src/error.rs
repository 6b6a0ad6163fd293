//! Error types for tracelore-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tracelore-core library
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

    /// Ingestion root directory does not exist
    #[error("root directory not found: {0}")]
    RootMissing(PathBuf),

    /// Another ingestion process already holds the lock for this root
    #[error("ingest lock already held: {0}")]
    LockHeld(PathBuf),

    /// Operation invalid for the engine's current state
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    /// A batch could not be committed after bounded retries
    #[error("batch commit failed after {attempts} attempts: {message}")]
    BatchFailed { attempts: u32, message: String },
}

/// Result type alias for tracelore-core
pub type Result<T> = std::result::Result<T, Error>;
