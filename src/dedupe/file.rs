//! Append-only, file-backed dedupe index.
//!
//! Every mutation appends one [`DedupeOp`] record; nothing is rewritten in
//! place. On open the records are replayed in file order. The index is an
//! optimization over the spool, which stays the source of truth, so replay
//! is lenient: a malformed record is skipped with a warning, at worst
//! causing a redundant receipt later.
//!
//! # Crash Safety
//!
//! - An unterminated, unparsable final record is truncated at open, so later
//!   appends never extend a torn line
//! - An unterminated but valid final record gets its terminator
//! - A record longer than the per-line cap is skipped like any other
//!   malformed record, and replay resumes after its terminator. An
//!   oversized unterminated tail is truncated
//! - [`FileDedupeIndex::compact`] writes a fresh log to a temp file and
//!   renames it over the old one

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::entry::{DedupeEntry, DedupeOp};
use super::error::{DedupeError, Result};
use super::index::DedupeIndex;
use crate::persistence::{BoundedLines, DEFAULT_MAX_LINE_BYTES, LineRead, fsync_file, fsync_parent_dir};
use crate::types::ActionId;

/// Configuration for a [`FileDedupeIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeConfig {
    /// Path to the operation log.
    pub path: PathBuf,
    /// Per-record cap for replay and appends.
    pub max_line_bytes: usize,
}

impl DedupeConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DedupeConfig {
            path: path.into(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(DedupeError::InvalidConfig("path must not be empty".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(DedupeError::InvalidConfig("max_line_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Counters describing the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeStats {
    pub live_entries: usize,
    pub emitted_entries: usize,
    /// Records in the log, replayed plus appended since open.
    pub records: u64,
    /// Malformed records skipped during replay.
    pub skipped_records: u64,
    /// Bytes dropped by torn-tail truncation at open.
    pub truncated_bytes: u64,
    pub file_bytes: u64,
}

/// A [`DedupeIndex`] persisted as an append-only operation log.
#[derive(Debug)]
pub struct FileDedupeIndex {
    path: PathBuf,
    max_line_bytes: usize,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    entries: HashMap<ActionId, DedupeEntry>,
    file_bytes: u64,
    records: u64,
    skipped_records: u64,
    truncated_bytes: u64,
    dirty: bool,
    needs_dir_sync: bool,
}

/// What replaying an existing log produced.
struct Replay {
    entries: HashMap<ActionId, DedupeEntry>,
    records: u64,
    skipped: u64,
    truncate_at: Option<u64>,
    needs_terminator: bool,
}

impl FileDedupeIndex {
    /// Opens the log at `config.path`, replaying it if present.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: DedupeConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let existed = path.try_exists()?;
        let replay = if existed {
            replay_log(&path, config.max_line_bytes)?
        } else {
            Replay {
                entries: HashMap::new(),
                records: 0,
                skipped: 0,
                truncate_at: None,
                needs_terminator: false,
            }
        };

        let mut truncated_bytes = 0;
        if let Some(offset) = replay.truncate_at {
            let file = OpenOptions::new().write(true).open(&path)?;
            truncated_bytes = file.metadata()?.len() - offset;
            file.set_len(offset)?;
            fsync_file(&file)?;
            warn!(offset, truncated_bytes, "Truncated torn tail from dedupe log");
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if replay.needs_terminator {
            file.write_all(b"\n")?;
            fsync_file(&file)?;
        }
        let file_bytes = file.metadata()?.len();

        info!(
            entries = replay.entries.len(),
            records = replay.records,
            skipped = replay.skipped,
            "Dedupe index opened"
        );

        Ok(FileDedupeIndex {
            path,
            max_line_bytes: config.max_line_bytes,
            state: Mutex::new(FileState {
                file,
                entries: replay.entries,
                file_bytes,
                records: replay.records,
                skipped_records: replay.skipped,
                truncated_bytes,
                dirty: false,
                needs_dir_sync: !existed,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces appended records to stable storage.
    ///
    /// The first commit after creating the file also syncs its directory,
    /// best-effort.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state();
        if state.dirty {
            fsync_file(&state.file)?;
            state.dirty = false;
        }
        if state.needs_dir_sync
            && fsync_parent_dir(&self.path).log_failure("fsync dedupe directory", &self.path)
        {
            state.needs_dir_sync = false;
        }
        Ok(())
    }

    /// Rewrites the log as one `set` record per live entry.
    ///
    /// The new log is written to `<path>.compact.tmp`, synced and renamed
    /// over the old one, so a crash at any point leaves one complete log.
    /// The append handle for the new log is opened before the rename, so
    /// once the rename lands every later append goes to the named file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn compact(&self) -> Result<DedupeStats> {
        let mut state = self.state();

        let mut tmp_name = OsString::from(self.path.as_os_str());
        tmp_name.push(".compact.tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut ids: Vec<&ActionId> = state.entries.keys().collect();
        ids.sort();

        let mut records = 0u64;
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut buf = Vec::new();
            for id in ids {
                let op = DedupeOp::Set {
                    action_id: id.clone(),
                    entry: state.entries[id].clone(),
                };
                buf.extend_from_slice(&op.to_line()?);
                records += 1;
            }
            tmp.write_all(&buf)?;
            fsync_file(&tmp)?;
        }

        let file = OpenOptions::new().append(true).open(&tmp_path)?;
        let file_bytes = file.metadata()?.len();

        std::fs::rename(&tmp_path, &self.path)?;
        fsync_parent_dir(&self.path).log_failure("fsync dedupe directory", &self.path);

        state.file = file;
        state.file_bytes = file_bytes;
        state.records = records;
        state.dirty = false;

        let stats = state.stats();
        info!(records, bytes = stats.file_bytes, "Dedupe log compacted");
        Ok(stats)
    }

    pub fn stats(&self) -> DedupeStats {
        self.state().stats()
    }

    fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `op` and applies it to the in-memory map.
    ///
    /// The map only changes after the write succeeded.
    fn append_op(&self, state: &mut FileState, op: DedupeOp) -> Result<()> {
        let line = op.to_line()?;
        let content_len = line.len() as u64 - 1;
        if content_len > self.max_line_bytes as u64 {
            return Err(DedupeError::RecordTooLarge {
                bytes: content_len,
                limit: self.max_line_bytes as u64,
            });
        }

        if let Err(e) = state.file.write_all(&line) {
            if let Err(rollback) = state.file.set_len(state.file_bytes) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Failed to roll back partial dedupe write"
                );
            }
            return Err(e.into());
        }

        state.file_bytes += line.len() as u64;
        state.records += 1;
        state.dirty = true;
        op.apply(&mut state.entries);
        Ok(())
    }
}

impl FileState {
    fn stats(&self) -> DedupeStats {
        DedupeStats {
            live_entries: self.entries.len(),
            emitted_entries: self.entries.values().filter(|e| e.emitted).count(),
            records: self.records,
            skipped_records: self.skipped_records,
            truncated_bytes: self.truncated_bytes,
            file_bytes: self.file_bytes,
        }
    }
}

impl DedupeIndex for FileDedupeIndex {
    fn get(&self, action_id: &ActionId) -> Option<DedupeEntry> {
        self.state().entries.get(action_id).cloned()
    }

    fn set(&self, action_id: &ActionId, entry: DedupeEntry) -> Result<()> {
        let mut state = self.state();
        self.append_op(
            &mut state,
            DedupeOp::Set {
                action_id: action_id.clone(),
                entry,
            },
        )
    }

    fn mark_emitted(&self, action_id: &ActionId) -> Result<bool> {
        let mut state = self.state();
        match state.entries.get(action_id) {
            None => return Ok(false),
            Some(entry) if entry.emitted => return Ok(true),
            Some(_) => {}
        }
        self.append_op(
            &mut state,
            DedupeOp::Emit {
                action_id: action_id.clone(),
                ts: Some(Utc::now()),
            },
        )?;
        debug!(action_id = %action_id, "Marked emitted");
        Ok(true)
    }

    fn delete(&self, action_id: &ActionId) -> Result<bool> {
        let mut state = self.state();
        if !state.entries.contains_key(action_id) {
            return Ok(false);
        }
        self.append_op(
            &mut state,
            DedupeOp::Delete {
                action_id: action_id.clone(),
            },
        )?;
        Ok(true)
    }

    fn size(&self) -> usize {
        self.state().entries.len()
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state();
        self.append_op(&mut state, DedupeOp::Clear)
    }
}

fn replay_log(path: &Path, max_line_bytes: usize) -> io::Result<Replay> {
    let mut replay = Replay {
        entries: HashMap::new(),
        records: 0,
        skipped: 0,
        truncate_at: None,
        needs_terminator: false,
    };

    for item in BoundedLines::open(path, max_line_bytes)?.resync_after_oversized() {
        match item? {
            LineRead::Complete(line) => {
                if line.is_blank() {
                    continue;
                }
                match serde_json::from_slice::<DedupeOp>(&line.bytes) {
                    Ok(op) => {
                        op.apply(&mut replay.entries);
                        replay.records += 1;
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = line.number,
                            error = %e,
                            "Skipping malformed dedupe record"
                        );
                        replay.skipped += 1;
                    }
                }
            }
            LineRead::IncompleteTail(line) => {
                match serde_json::from_slice::<DedupeOp>(&line.bytes) {
                    Ok(op) if !line.is_blank() => {
                        op.apply(&mut replay.entries);
                        replay.records += 1;
                        replay.needs_terminator = true;
                    }
                    _ => replay.truncate_at = Some(line.offset),
                }
            }
            LineRead::TooLarge {
                number,
                offset,
                resumed_at,
                ..
            } => {
                if resumed_at.is_some() {
                    warn!(
                        path = %path.display(),
                        line = number,
                        "Skipping dedupe record that exceeds the line cap"
                    );
                    replay.skipped += 1;
                } else {
                    replay.truncate_at = Some(offset);
                }
            }
        }
    }

    Ok(replay)
}
