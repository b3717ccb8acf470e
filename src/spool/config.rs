//! Spool configuration.
//!
//! Defaults bound a misbehaving producer to roughly 100k entries or 100 MiB
//! of local disk. Environment overrides:
//!
//! - `ACTION_SPOOL_MAX_ENTRIES`
//! - `ACTION_SPOOL_MAX_FILE_BYTES`
//! - `ACTION_SPOOL_MAX_LINE_BYTES`
//! - `ACTION_SPOOL_AUTO_COMMIT_MS` (0 disables auto-commit)

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{Result, SpoolError};
use crate::persistence::DEFAULT_MAX_LINE_BYTES;

/// Default maximum number of entries (100,000).
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Default maximum spool file size (100 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Auto-commit interval used by `from_env` when the variable is unset.
pub const DEFAULT_AUTO_COMMIT_MS: u64 = 1_000;

/// Configuration for a [`SpoolStore`](super::SpoolStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolConfig {
    /// Path to the spool file. The meta and lock files live next to it.
    pub path: PathBuf,

    /// Hard cap on the number of entries.
    pub max_entries: u64,

    /// Hard cap on the spool file size in bytes.
    pub max_file_bytes: u64,

    /// Per-line cap used by recovery scans and reads. Appends larger than
    /// this are rejected up front.
    pub max_line_bytes: usize,

    /// Interval of the background commit task. Zero disables it.
    ///
    /// A non-zero interval requires a Tokio runtime at open.
    pub auto_commit_interval: Duration,
}

impl SpoolConfig {
    /// Creates a config with default caps and auto-commit disabled.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SpoolConfig {
            path: path.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            auto_commit_interval: Duration::ZERO,
        }
    }

    /// Creates a config from environment variables, falling back to defaults.
    ///
    /// Unlike [`SpoolConfig::new`], auto-commit defaults to
    /// [`DEFAULT_AUTO_COMMIT_MS`].
    pub fn from_env(path: impl Into<PathBuf>) -> Self {
        let defaults = Self::new(path);
        SpoolConfig {
            max_entries: env_u64("ACTION_SPOOL_MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_file_bytes: env_u64("ACTION_SPOOL_MAX_FILE_BYTES")
                .unwrap_or(defaults.max_file_bytes),
            max_line_bytes: env_u64("ACTION_SPOOL_MAX_LINE_BYTES")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_line_bytes),
            auto_commit_interval: Duration::from_millis(
                env_u64("ACTION_SPOOL_AUTO_COMMIT_MS").unwrap_or(DEFAULT_AUTO_COMMIT_MS),
            ),
            ..defaults
        }
    }

    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn with_auto_commit(mut self, interval: Duration) -> Self {
        self.auto_commit_interval = interval;
        self
    }

    /// Checks that every cap is usable.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(SpoolError::InvalidConfig("path must not be empty".into()));
        }
        if self.max_entries == 0 {
            return Err(SpoolError::InvalidConfig("max_entries must be > 0".into()));
        }
        if self.max_file_bytes == 0 {
            return Err(SpoolError::InvalidConfig("max_file_bytes must be > 0".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(SpoolError::InvalidConfig("max_line_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_defaults_without_auto_commit() {
        let config = SpoolConfig::new("/tmp/spool.jsonl");
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
        assert!(config.auto_commit_interval.is_zero());
        config.validate().unwrap();
    }

    #[test]
    fn zero_caps_are_rejected() {
        let base = SpoolConfig::new("/tmp/spool.jsonl");
        assert!(base.clone().with_max_entries(0).validate().is_err());
        assert!(base.clone().with_max_file_bytes(0).validate().is_err());
        assert!(base.with_max_line_bytes(0).validate().is_err());
        assert!(SpoolConfig::new("").validate().is_err());
    }
}
