//! Meta snapshot for fast spool restarts.
//!
//! After each commit the spool writes `<spool>.meta.json` with the derived
//! state a full scan would otherwise recompute:
//!
//! ```json
//! {"metaVersion":2,"sequence":42,"headDigest":"sha256:..","entryCount":42,"fileBytes":9120,"mtimeMs":1760000000000,"maxLineBytes":4194304}
//! ```
//!
//! The snapshot is only trusted when `fileBytes` and `mtimeMs` match the live
//! spool file exactly. Any append after the snapshot changes the size, so a
//! stale snapshot is discarded and the caller falls back to a full scan.
//!
//! `maxLineBytes` is the per-line cap the file was last verified under. A
//! snapshot written under a different cap is not trusted: lines that passed
//! then may be over the cap now, and only a scan finds them.
//!
//! # Atomic Writes
//!
//! Snapshots are written with write-to-temp-then-rename:
//! 1. Write to `<meta>.tmp`
//! 2. fsync the file
//! 3. Rename to `<meta>`
//! 4. fsync the directory (best-effort)

use std::ffi::OsString;
use std::fs::{Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::fsync::{fsync_file, fsync_parent_dir};
use crate::types::Digest;

/// Current meta format version. Any other version forces a full rescan.
pub const META_VERSION: u32 = 2;

/// Errors that can occur during meta snapshot operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written by a different format version.
    #[error("meta version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
}

/// Result type for meta snapshot operations.
pub type Result<T> = std::result::Result<T, MetaError>;

/// Cached derived state of a spool file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpoolMeta {
    pub meta_version: u32,
    pub sequence: u64,
    pub head_digest: Digest,
    pub entry_count: u64,
    pub file_bytes: u64,
    pub mtime_ms: u64,
    pub max_line_bytes: u64,
}

impl SpoolMeta {
    /// True if this snapshot describes the file whose stat is `metadata`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match mtime_ms(metadata) {
            Ok(mtime) => self.file_bytes == metadata.len() && self.mtime_ms == mtime,
            Err(_) => false,
        }
    }
}

/// Returns the meta path for a spool file: `<spool>.meta.json`.
pub fn meta_path_for(spool_path: &Path) -> PathBuf {
    let mut name = OsString::from(spool_path.as_os_str());
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Modification time in milliseconds since the Unix epoch.
pub fn mtime_ms(metadata: &Metadata) -> io::Result<u64> {
    let modified = metadata.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(since_epoch.as_millis() as u64)
}

/// Saves a meta snapshot atomically.
///
/// The directory fsync after the rename is best-effort; a lost rename costs
/// one full scan on the next start, not data.
pub fn save_meta_atomic(path: &Path, meta: &SpoolMeta) -> Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let bytes = serde_json::to_vec(meta)?;
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;
    fsync_parent_dir(path).log_failure("fsync meta directory", path);

    Ok(())
}

/// Loads a meta snapshot from disk.
///
/// # Errors
///
/// Returns an error if the file can't be read, the JSON is malformed or the
/// version is unknown.
pub fn load_meta(path: &Path) -> Result<SpoolMeta> {
    let bytes = std::fs::read(path)?;
    let meta: SpoolMeta = serde_json::from_slice(&bytes)?;
    if meta.meta_version != META_VERSION {
        return Err(MetaError::VersionMismatch {
            expected: META_VERSION,
            got: meta.meta_version,
        });
    }
    Ok(meta)
}

/// Returns the snapshot at `meta_path` if it still describes `spool_path`
/// as verified under `max_line_bytes`.
///
/// Every reason to distrust the snapshot (missing, unreadable, unknown
/// version, different line cap, stat mismatch) yields `None`; the caller
/// then rescans.
pub fn load_trusted_meta(
    meta_path: &Path,
    spool_path: &Path,
    max_line_bytes: usize,
) -> Option<SpoolMeta> {
    let meta = match load_meta(meta_path) {
        Ok(meta) => meta,
        Err(MetaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %meta_path.display(), error = %e, "Discarding unreadable spool meta");
            return None;
        }
    };

    if meta.max_line_bytes != max_line_bytes as u64 {
        debug!(
            path = %spool_path.display(),
            meta_cap = meta.max_line_bytes,
            configured_cap = max_line_bytes,
            "Spool meta was written under a different line cap"
        );
        return None;
    }

    let metadata = match std::fs::metadata(spool_path) {
        Ok(m) => m,
        Err(e) => {
            warn!(
                path = %spool_path.display(),
                error = %e,
                "Spool meta present but spool file is not; discarding meta"
            );
            return None;
        }
    };

    if !meta.matches(&metadata) {
        debug!(
            path = %spool_path.display(),
            meta_bytes = meta.file_bytes,
            live_bytes = metadata.len(),
            "Spool meta is stale"
        );
        return None;
    }

    Some(meta)
}
