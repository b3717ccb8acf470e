//! The hash-chained, append-only spool store.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::SpoolConfig;
use super::diagnostics::{RecoverySource, SpoolDiagnostics, SpoolMode};
use super::error::{Corruption, CorruptionReason, HardCap, Result, SpoolError};
use super::recovery::{ScanOutcome, scan_spool};
use crate::persistence::meta::mtime_ms;
use crate::persistence::{
    BoundedLines, LineRead, META_VERSION, MetaError, SpoolLock, SpoolMeta, fsync_file,
    fsync_parent_dir, load_trusted_meta, meta_path_for, save_meta_atomic,
};
use crate::types::{Digest, SpoolEntry};

/// A single-writer, hash-chained append-only log.
///
/// `append` writes without forcing durability; `commit` makes everything
/// written so far durable. Mutating operations are serialized behind an
/// internal mutex, so a store can be shared through an `Arc`.
///
/// Dropping the store without [`close`](SpoolStore::close) behaves like a
/// crash: uncommitted bytes may or may not survive, and the lock is released
/// by the OS when the file handle closes.
#[derive(Debug)]
pub struct SpoolStore {
    state: Arc<Mutex<SpoolState>>,
    shutdown: CancellationToken,
    path: PathBuf,
}

#[derive(Debug)]
struct SpoolState {
    config: SpoolConfig,
    meta_path: PathBuf,
    file: Option<File>,
    lock: Option<SpoolLock>,
    sequence: u64,
    head_digest: Digest,
    entry_count: u64,
    file_bytes: u64,
    dirty: bool,
    /// The directory entry for the spool file has not been synced yet.
    needs_dir_sync: bool,
    /// The on-disk meta snapshot does not describe the current file.
    meta_stale: bool,
    corruption: Option<Corruption>,
    recovery: RecoverySource,
    truncated_bytes: u64,
    closed: bool,
}

impl SpoolStore {
    /// Opens (or creates) the spool at `config.path`.
    ///
    /// Acquires the single-writer lock, rebuilds derived state from a trusted
    /// meta snapshot or a full scan, and starts the auto-commit task when an
    /// interval is configured. A corrupt file still opens, in read-only mode.
    ///
    /// # Errors
    ///
    /// - [`SpoolError::InvalidConfig`] for unusable caps, or a non-zero
    ///   auto-commit interval outside a Tokio runtime
    /// - [`SpoolError::Locked`] if another writer holds the lock
    /// - [`SpoolError::Io`] for filesystem failures
    ///
    /// The lock is released again on every error path after acquisition.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: SpoolConfig) -> Result<Self> {
        config.validate()?;

        let runtime = if config.auto_commit_interval.is_zero() {
            None
        } else {
            Some(Handle::try_current().map_err(|_| {
                SpoolError::InvalidConfig("auto-commit requires a Tokio runtime".into())
            })?)
        };

        let path = config.path.clone();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // Dropped (and so released) if anything below fails.
        let lock = SpoolLock::acquire(&path)?;

        let meta_path = meta_path_for(&path);
        let existed = path.try_exists()?;

        let trusted = load_trusted_meta(&meta_path, &path, config.max_line_bytes);
        let (outcome, recovery) = match trusted {
            Some(meta) => (
                ScanOutcome {
                    sequence: meta.sequence,
                    head_digest: meta.head_digest,
                    entry_count: meta.entry_count,
                    file_bytes: meta.file_bytes,
                    corruption: None,
                    truncated_bytes: 0,
                },
                RecoverySource::Meta,
            ),
            None => {
                let outcome = scan_spool(&path, config.max_line_bytes)?;
                let source = if existed {
                    RecoverySource::Scan
                } else {
                    RecoverySource::Fresh
                };
                (outcome, source)
            }
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(
            sequence = outcome.sequence,
            entries = outcome.entry_count,
            bytes = outcome.file_bytes,
            recovery = ?recovery,
            corrupt = outcome.corruption.is_some(),
            "Spool opened"
        );

        let state = SpoolState {
            meta_path,
            file: Some(file),
            lock: Some(lock),
            sequence: outcome.sequence,
            head_digest: outcome.head_digest,
            entry_count: outcome.entry_count,
            file_bytes: outcome.file_bytes,
            dirty: false,
            needs_dir_sync: !existed,
            meta_stale: recovery != RecoverySource::Meta && outcome.corruption.is_none(),
            corruption: outcome.corruption,
            recovery,
            truncated_bytes: outcome.truncated_bytes,
            closed: false,
            config,
        };

        let store = SpoolStore {
            state: Arc::new(Mutex::new(state)),
            shutdown: CancellationToken::new(),
            path,
        };

        if let Some(handle) = runtime {
            let interval = store.lock_state().config.auto_commit_interval;
            store.spawn_auto_commit(&handle, interval);
        }

        Ok(store)
    }

    /// Appends `entry` to the log and returns its sequence.
    ///
    /// Checks run in this order and any failure leaves the store unchanged:
    /// entry-count cap, per-line cap, byte cap, chain linkage, sequence.
    /// The write is not forced to disk; call [`commit`](Self::commit).
    pub fn append(&self, entry: &SpoolEntry) -> Result<u64> {
        self.lock_state().append(entry)
    }

    /// Makes every appended entry durable and refreshes the meta snapshot.
    ///
    /// A no-op when nothing changed since the last commit. The directory
    /// fsync and the meta write are best-effort.
    pub fn commit(&self) -> Result<()> {
        self.lock_state().commit()
    }

    /// Reads entries with `sequence >= from`, at most `limit` of them.
    ///
    /// Blank and unparsable lines are skipped: an unparsable line seen here
    /// is most likely an append still in flight. An oversized line stops the
    /// read and marks the store corrupt.
    ///
    /// The internal mutex is not held while scanning, so reads run alongside
    /// appends.
    pub fn read(&self, from: u64, limit: Option<usize>) -> Result<Vec<SpoolEntry>> {
        let max_line_bytes = {
            let state = self.lock_state();
            if state.closed {
                return Err(SpoolError::Closed);
            }
            state.config.max_line_bytes
        };

        let mut entries = Vec::new();
        if limit == Some(0) {
            return Ok(entries);
        }

        let lines = match BoundedLines::open(&self.path, max_line_bytes) {
            Ok(lines) => lines,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        for item in lines {
            match item? {
                LineRead::Complete(line) | LineRead::IncompleteTail(line) => {
                    if line.is_blank() {
                        continue;
                    }
                    let entry: SpoolEntry = match serde_json::from_slice(&line.bytes) {
                        Ok(entry) => entry,
                        Err(e) => {
                            debug!(line = line.number, error = %e, "Skipping unparsable spool line");
                            continue;
                        }
                    };
                    if entry.sequence < from {
                        continue;
                    }
                    entries.push(entry);
                    if limit.is_some_and(|n| entries.len() >= n) {
                        break;
                    }
                }
                LineRead::TooLarge {
                    number,
                    offset,
                    buffered,
                    ..
                } => {
                    self.record_corruption(Corruption {
                        reason: CorruptionReason::LineTooLarge,
                        line: number,
                        offset,
                        sequence: None,
                        detail: format!(
                            "line exceeds {max_line_bytes} bytes ({buffered} buffered before stopping)"
                        ),
                    });
                    break;
                }
            }
        }

        Ok(entries)
    }

    /// Sequence of the last appended entry (0 when empty).
    pub fn sequence(&self) -> u64 {
        self.lock_state().sequence
    }

    /// Digest of the last appended entry, or the genesis digest.
    pub fn head_digest(&self) -> Digest {
        self.lock_state().head_digest.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_corrupt(&self) -> bool {
        self.lock_state().corruption.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Returns a point-in-time snapshot for operator tooling.
    pub fn diagnostics(&self) -> SpoolDiagnostics {
        self.lock_state().diagnostics()
    }

    /// Stops auto-commit, commits once (best-effort), closes the file and
    /// releases the lock.
    ///
    /// Idempotent: later calls return immediately.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn close(&self) {
        self.shutdown.cancel();

        let mut state = self.lock_state();
        if state.closed {
            return;
        }

        if let Err(e) = state.commit() {
            warn!(error = %e, "Final spool commit failed");
        }

        state.closed = true;
        state.file = None;
        if let Some(lock) = state.lock.take()
            && let Err(e) = lock.release()
        {
            warn!(error = %e, "Failed to release spool lock");
        }

        info!(sequence = state.sequence, "Spool closed");
    }

    fn lock_state(&self) -> MutexGuard<'_, SpoolState> {
        lock_state(&self.state)
    }

    fn record_corruption(&self, corruption: Corruption) {
        let mut state = self.lock_state();
        if state.corruption.is_none() {
            warn!(
                path = %self.path.display(),
                reason = %corruption.reason,
                line = corruption.line,
                "Spool corruption detected during read; store is now read-only"
            );
            state.corruption = Some(corruption);
        }
    }

    /// Spawns the periodic commit task.
    ///
    /// The task holds only a weak reference, so it never keeps the store
    /// alive, and it exits on [`close`](Self::close) or drop.
    fn spawn_auto_commit(&self, handle: &Handle, period: Duration) {
        let state = Arc::downgrade(&self.state);
        let shutdown = self.shutdown.clone();
        handle.spawn(auto_commit_loop(state, shutdown, period));
        debug!(period_ms = period.as_millis() as u64, "Auto-commit started");
    }
}

impl Drop for SpoolStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn auto_commit_loop(state: Weak<Mutex<SpoolState>>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(state) = state.upgrade() else { break };
                auto_commit_tick(&state);
            }
        }
    }

    debug!("Auto-commit stopped");
}

fn auto_commit_tick(state: &Mutex<SpoolState>) {
    let mut state = lock_state(state);
    if state.closed || !state.dirty {
        return;
    }
    if let Err(e) = state.commit() {
        warn!(path = %state.config.path.display(), error = %e, "Auto-commit failed");
    }
}

fn lock_state(state: &Mutex<SpoolState>) -> MutexGuard<'_, SpoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SpoolState {
    fn append(&mut self, entry: &SpoolEntry) -> Result<u64> {
        if self.closed {
            return Err(SpoolError::Closed);
        }
        if let Some(corruption) = &self.corruption {
            return Err(SpoolError::Corrupt(corruption.clone()));
        }

        if self.entry_count >= self.config.max_entries {
            return Err(SpoolError::Full {
                cap: HardCap::Entries,
                limit: self.config.max_entries,
            });
        }

        let line = entry.to_line()?;
        let line_len = line.len() as u64;
        let content_len = line_len - 1;
        if content_len > self.config.max_line_bytes as u64 {
            return Err(SpoolError::EntryTooLarge {
                bytes: content_len,
                limit: self.config.max_line_bytes as u64,
            });
        }
        if self.file_bytes + line_len > self.config.max_file_bytes {
            return Err(SpoolError::Full {
                cap: HardCap::Bytes,
                limit: self.config.max_file_bytes,
            });
        }

        if entry.prev_entry_digest != self.head_digest {
            return Err(SpoolError::InvalidChain {
                expected: self.head_digest.clone(),
                got: entry.prev_entry_digest.clone(),
            });
        }
        if entry.sequence != self.sequence + 1 {
            return Err(SpoolError::InvalidSequence {
                expected: self.sequence + 1,
                got: entry.sequence,
            });
        }

        let file = self.file.as_mut().ok_or(SpoolError::Closed)?;
        if let Err(e) = file.write_all(&line) {
            // A partial line would be extended by the next append.
            if let Err(rollback) = file.set_len(self.file_bytes) {
                warn!(
                    path = %self.config.path.display(),
                    error = %rollback,
                    "Failed to roll back partial spool write"
                );
            }
            return Err(e.into());
        }

        self.sequence = entry.sequence;
        self.head_digest = entry.entry_digest.clone();
        self.entry_count += 1;
        self.file_bytes += line_len;
        self.dirty = true;
        self.meta_stale = true;

        debug!(
            sequence = self.sequence,
            action_id = %entry.action_id(),
            digest = entry.entry_digest.short(),
            "Appended spool entry"
        );

        Ok(self.sequence)
    }

    fn commit(&mut self) -> Result<()> {
        if self.closed {
            return Err(SpoolError::Closed);
        }
        let Some(file) = self.file.as_ref() else {
            return Err(SpoolError::Closed);
        };

        if self.dirty {
            fsync_file(file)?;
            self.dirty = false;
        }

        if self.needs_dir_sync
            && fsync_parent_dir(&self.config.path).log_failure("fsync spool directory", &self.config.path)
        {
            self.needs_dir_sync = false;
        }

        if self.meta_stale && self.corruption.is_none() {
            match self.write_meta() {
                Ok(()) => self.meta_stale = false,
                Err(e) => warn!(
                    path = %self.meta_path.display(),
                    error = %e,
                    "Failed to write spool meta; next open will rescan"
                ),
            }
        }

        debug!(sequence = self.sequence, "Spool committed");
        Ok(())
    }

    fn write_meta(&self) -> std::result::Result<(), MetaError> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let metadata = file.metadata()?;
        let meta = SpoolMeta {
            meta_version: META_VERSION,
            sequence: self.sequence,
            head_digest: self.head_digest.clone(),
            entry_count: self.entry_count,
            file_bytes: metadata.len(),
            mtime_ms: mtime_ms(&metadata)?,
            max_line_bytes: self.config.max_line_bytes as u64,
        };
        save_meta_atomic(&self.meta_path, &meta)
    }

    fn diagnostics(&self) -> SpoolDiagnostics {
        let entries_reached = self.entry_count >= self.config.max_entries;
        let bytes_reached = self.file_bytes >= self.config.max_file_bytes;
        let spool_corrupt = self.corruption.is_some();
        let mode = if spool_corrupt || entries_reached || bytes_reached {
            SpoolMode::ReadOnly
        } else {
            SpoolMode::Active
        };

        SpoolDiagnostics {
            mode,
            entries_reached,
            bytes_reached,
            spool_corrupt,
            corruption: self.corruption.clone(),
            entry_count: self.entry_count,
            max_entries: self.config.max_entries,
            file_bytes: self.file_bytes,
            max_file_bytes: self.config.max_file_bytes,
            max_line_bytes: self.config.max_line_bytes,
            sequence: self.sequence,
            head_digest: self.head_digest.clone(),
            file_path: self.config.path.clone(),
            dirty: self.dirty,
            closed: self.closed,
            recovery: self.recovery,
            truncated_bytes: self.truncated_bytes,
        }
    }
}
