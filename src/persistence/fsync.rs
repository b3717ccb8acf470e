//! Low-level fsync operations for durability.
//!
//! A file fsync is a hard requirement: callers see its failure. A directory
//! fsync after creating or renaming a file is best-effort here. Some
//! platforms and filesystems refuse to fsync a directory handle, and the file
//! contents are already durable by the time it runs, so its failure is
//! reported as a [`BestEffort`] value instead of an error.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use tracing::warn;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory to disk, making new or renamed entries durable.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or if the fsync system call fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Syncs the directory containing `path`.
///
/// Paths without a parent component (a bare file name) resolve to the
/// current directory.
pub fn fsync_parent_dir(path: &Path) -> BestEffort {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    BestEffort::from(fsync_dir(parent))
}

/// Outcome of an operation whose failure must not fail the enclosing call.
///
/// Used for directory fsyncs and meta snapshot writes: the correctness
/// guarantee doesn't depend on them, so a failure is logged and dropped.
#[must_use = "best-effort outcomes should be logged with `log_failure`"]
#[derive(Debug)]
pub enum BestEffort {
    Done,
    Failed(io::Error),
}

impl BestEffort {
    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done)
    }

    /// Logs a failure at warn level. Returns true if the operation succeeded.
    pub fn log_failure(self, operation: &'static str, path: &Path) -> bool {
        match self {
            BestEffort::Done => true,
            BestEffort::Failed(e) => {
                warn!(
                    operation,
                    path = %path.display(),
                    error = %e,
                    "Best-effort operation failed"
                );
                false
            }
        }
    }
}

impl From<io::Result<()>> for BestEffort {
    fn from(result: io::Result<()>) -> Self {
        match result {
            Ok(()) => BestEffort::Done,
            Err(e) => BestEffort::Failed(e),
        }
    }
}
