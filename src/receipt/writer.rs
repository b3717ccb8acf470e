//! Crash-safe receipt file writes.
//!
//! A receipt is written in four steps:
//! 1. Write to `.<name>.tmp` in the target directory
//! 2. fsync the temp file
//! 3. Rename over `<name>`
//! 4. fsync the directory (best-effort)
//!
//! After step 3 a reader sees either the old file or the complete new one,
//! never a partial write. Names are validated first so a hostile action id
//! can't escape the directory.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::persistence::{BestEffort, fsync_dir, fsync_file};

/// Errors from [`AtomicWriter::write`].
#[derive(Debug, Error)]
pub enum WriteError {
    /// The file name is empty, hidden, or contains a path separator or NUL.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Validates that `name` is a plain file name inside the target directory.
pub fn validate_name(name: &str) -> Result<(), WriteError> {
    if name.is_empty() {
        return Err(WriteError::InvalidName(name.to_string()));
    }

    // Path separators and NUL would leave the directory or truncate the path.
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(WriteError::InvalidName(name.to_string()));
    }

    // Hidden files are reserved for temp files; this also rejects `.` and `..`.
    if name.starts_with('.') {
        return Err(WriteError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Writes whole files atomically into one directory.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    dir: PathBuf,
    sync_dir: bool,
}

impl AtomicWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AtomicWriter {
            dir: dir.into(),
            sync_dir: true,
        }
    }

    /// Skips the directory fsync after the rename.
    pub fn without_dir_sync(mut self) -> Self {
        self.sync_dir = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically replaces `<dir>/<name>` with `bytes`. Returns the final path.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::InvalidName`] before touching the filesystem,
    /// or [`WriteError::Io`] if the write, fsync or rename fails. A failed
    /// directory fsync is logged, not returned.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, WriteError> {
        validate_name(name)?;
        std::fs::create_dir_all(&self.dir)?;

        let final_path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{name}.tmp"));

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(bytes)?;
            fsync_file(&file)?;
        }

        std::fs::rename(&temp_path, &final_path)?;

        if self.sync_dir {
            BestEffort::from(fsync_dir(&self.dir))
                .log_failure("fsync receipt directory", &self.dir);
        }

        debug!(path = %final_path.display(), bytes = bytes.len(), "Wrote file atomically");
        Ok(final_path)
    }
}
