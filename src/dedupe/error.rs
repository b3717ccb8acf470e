use std::io;

use thiserror::Error;

/// Errors that can occur during dedupe index operations.
#[derive(Debug, Error)]
pub enum DedupeError {
    /// IO error while reading or appending the operation log.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record would exceed the per-line cap and could never be replayed.
    #[error("dedupe record too large: {bytes} bytes exceeds line limit {limit}")]
    RecordTooLarge { bytes: u64, limit: u64 },

    /// The configuration can't be used.
    #[error("invalid dedupe config: {0}")]
    InvalidConfig(String),
}

/// Result type for dedupe index operations.
pub type Result<T> = std::result::Result<T, DedupeError>;
