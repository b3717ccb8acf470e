//! Spool error taxonomy.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::LockError;
use crate::types::Digest;

/// Why a spool was classified as corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorruptionReason {
    /// An entry does not link to its predecessor, or its sequence number
    /// does not follow its predecessor's.
    ChainBroken,
    /// A line before the final one is not a valid entry.
    MalformedJson,
    /// A line exceeds the per-line byte cap.
    LineTooLarge,
}

impl CorruptionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CorruptionReason::ChainBroken => "CHAIN_BROKEN",
            CorruptionReason::MalformedJson => "MALFORMED_JSON",
            CorruptionReason::LineTooLarge => "LINE_TOO_LARGE",
        }
    }
}

impl fmt::Display for CorruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a detected corruption. Sticky for the lifetime of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corruption {
    pub reason: CorruptionReason,
    /// 1-based line number of the offending line.
    pub line: u64,
    /// Byte offset where the offending line starts.
    pub offset: u64,
    /// Sequence of the offending entry, when it could be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub detail: String,
}

/// Which hard cap stopped an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardCap {
    Entries,
    Bytes,
}

impl fmt::Display for HardCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardCap::Entries => f.write_str("entry count"),
            HardCap::Bytes => f.write_str("file bytes"),
        }
    }
}

/// Errors that can occur during spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A hard cap is reached. Permanent until the spool is replaced.
    #[error("spool full: {cap} limit {limit} reached")]
    Full { cap: HardCap, limit: u64 },

    /// The spool was found corrupt and is read-only.
    #[error("spool corrupt ({}) at line {}: {}", .0.reason, .0.line, .0.detail)]
    Corrupt(Corruption),

    /// The entry does not link to the current head.
    #[error("invalid chain: expected prev_entry_digest {expected}, got {got}")]
    InvalidChain { expected: Digest, got: Digest },

    /// The entry's sequence is not the next one.
    #[error("invalid sequence: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },

    /// The serialized entry is larger than the per-line cap, so it could
    /// never be read back.
    #[error("entry too large: {bytes} bytes exceeds line limit {limit}")]
    EntryTooLarge { bytes: u64, limit: u64 },

    /// The store has been closed.
    #[error("spool is closed")]
    Closed,

    /// Another writer holds the spool lock.
    #[error("spool is locked by another writer: {}", path.display())]
    Locked { path: PathBuf },

    /// The configuration can't be used.
    #[error("invalid spool config: {0}")]
    InvalidConfig(String),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LockError> for SpoolError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held { path } => SpoolError::Locked { path },
            LockError::Io(e) => SpoolError::Io(e),
        }
    }
}

/// Result type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
