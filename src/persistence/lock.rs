//! Single-writer advisory lock for a spool file.
//!
//! The lock lives in a sibling file (`<spool>.lock`) and is held with
//! `flock(LOCK_EX | LOCK_NB)` through `fs2`. A second opener, in another
//! process or through another handle in this one, fails fast with
//! [`LockError::Held`] instead of blocking.
//!
//! The lock is tied to the open file description, so dropping a
//! [`SpoolLock`] releases it even when [`SpoolLock::release`] was never
//! called. That is what keeps a failed initialization from leaking the lock.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors that can occur while acquiring the spool lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live holder owns the lock.
    #[error("spool is locked by another writer: {}", path.display())]
    Held { path: PathBuf },

    /// IO error while opening or locking the lock file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Returns the lock file path for a spool file: `<spool>.lock`.
pub fn lock_path_for(spool_path: &Path) -> PathBuf {
    let mut name = OsString::from(spool_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// A held single-writer lock.
#[derive(Debug)]
pub struct SpoolLock {
    file: File,
    path: PathBuf,
}

impl SpoolLock {
    /// Acquires the lock guarding `spool_path`.
    ///
    /// The holder's PID is written into the lock file for operators. Its
    /// content carries no meaning for the lock itself.
    pub fn acquire(spool_path: &Path) -> Result<Self, LockError> {
        let path = lock_path_for(spool_path);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(LockError::Held { path });
            }
            return Err(LockError::Io(e));
        }

        // Only rewrite the marker once we own it.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(SpoolLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock.
    ///
    /// The lock file itself is left in place: removing it would race with a
    /// concurrent opener that already holds a handle to it.
    pub fn release(self) -> io::Result<()> {
        FileExt::unlock(&self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/spool.jsonl")),
            PathBuf::from("/data/spool.jsonl.lock")
        );
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let spool = dir.path().join("spool.jsonl");

        let _held = SpoolLock::acquire(&spool).unwrap();
        let second = SpoolLock::acquire(&spool);
        assert!(matches!(second, Err(LockError::Held { .. })));
    }

    #[test]
    fn release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let spool = dir.path().join("spool.jsonl");

        let held = SpoolLock::acquire(&spool).unwrap();
        held.release().unwrap();

        SpoolLock::acquire(&spool).unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempdir().unwrap();
        let spool = dir.path().join("spool.jsonl");

        {
            let _held = SpoolLock::acquire(&spool).unwrap();
        }

        SpoolLock::acquire(&spool).unwrap();
    }

    #[test]
    fn lock_file_records_pid() {
        let dir = tempdir().unwrap();
        let spool = dir.path().join("spool.jsonl");

        let held = SpoolLock::acquire(&spool).unwrap();
        let content = std::fs::read_to_string(held.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
