//! Cursor-based drainer.
//!
//! Each cycle first retries entries that failed in earlier cycles, then
//! reads the entries after the in-memory watermark, skips those the dedupe
//! index already records as emitted, and hands the rest to the [`Emitter`].
//! A confirmed receipt is recorded in the dedupe index (and committed) before
//! the entry counts as resolved.
//!
//! The watermark only saves rescanning. It starts at 0 after a restart unless
//! the caller seeds it, and correctness never depends on it: the dedupe index
//! is what keeps an action from being emitted twice.
//!
//! # Watermark Advancement
//!
//! The watermark advances to the last sequence read, whatever happened to
//! each entry. An entry whose emit or record failed moves to the retry set
//! and is offered again at the start of every later cycle until it resolves,
//! so one entry that keeps failing never holds back the entries after it.
//!
//! The retry set lives in memory. A host that persists the watermark should
//! persist [`Drainer::resume_watermark`] instead, which stays below every
//! pending retry.
//!
//! # Overlap
//!
//! Cycles never overlap. A cycle requested while another is in flight
//! returns a report with `busy` set, without touching the spool.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::DrainConfig;
use super::emitter::Emitter;
use crate::dedupe::{DedupeEntry, DedupeError, DedupeIndex, DedupeStore};
use crate::spool::{SpoolError, SpoolStore};
use crate::types::{ActionId, SpoolEntry};

/// Errors that stop a drain cycle or the drain loop from starting.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),

    #[error("dedupe error: {0}")]
    Dedupe(#[from] DedupeError),

    #[error("invalid drain config: {0}")]
    InvalidConfig(String),

    #[error("drain loop requires a Tokio runtime")]
    NoRuntime,

    #[error("drain loop already started")]
    AlreadyStarted,

    /// The drainer was stopped and can't be restarted.
    #[error("drainer is stopped")]
    Stopped,
}

/// A failure reported to the error callback. Never returned as an error:
/// the loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainFailure {
    /// The emitter failed for one entry. The rest of the batch still ran.
    Emit {
        sequence: u64,
        action_id: ActionId,
        error: String,
    },
    /// The receipt was written but recording it in the dedupe index failed.
    /// The entry will be emitted again.
    Record {
        sequence: u64,
        action_id: ActionId,
        error: String,
    },
    /// The whole cycle failed, e.g. the spool could not be read.
    Cycle { error: String },
}

impl fmt::Display for DrainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainFailure::Emit {
                sequence,
                action_id,
                error,
            } => write!(f, "emit failed for {action_id} (sequence {sequence}): {error}"),
            DrainFailure::Record {
                sequence,
                action_id,
                error,
            } => write!(
                f,
                "recording {action_id} (sequence {sequence}) as emitted failed: {error}"
            ),
            DrainFailure::Cycle { error } => write!(f, "drain cycle failed: {error}"),
        }
    }
}

/// Receives every [`DrainFailure`].
pub type ErrorCallback = Arc<dyn Fn(&DrainFailure) + Send + Sync>;

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Entries whose receipts were written this cycle, in sequence order.
    pub emitted: Vec<SpoolEntry>,
    /// Sequences skipped because the dedupe index already had them emitted.
    pub skipped: Vec<u64>,
    pub failures: Vec<DrainFailure>,
    /// Another cycle was in flight; nothing was done.
    pub busy: bool,
    /// Watermark after the cycle.
    pub watermark: u64,
    /// Entries left in the retry set after the cycle.
    pub pending_retries: usize,
}

impl DrainReport {
    pub fn emitted_ids(&self) -> Vec<&ActionId> {
        self.emitted.iter().map(SpoolEntry::action_id).collect()
    }
}

/// Clears the draining flag when a cycle ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Moves spool entries to the emitter exactly once per action.
pub struct Drainer {
    spool: Arc<SpoolStore>,
    dedupe: Arc<DedupeStore>,
    emitter: Arc<dyn Emitter>,
    config: DrainConfig,
    watermark: AtomicU64,
    retry: Mutex<BTreeMap<u64, SpoolEntry>>,
    draining: AtomicBool,
    on_error: ErrorCallback,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Drainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drainer")
            .field("spool", &self.spool.path())
            .field("config", &self.config)
            .field("watermark", &self.watermark())
            .field("pending_retries", &self.retry().len())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drainer {
    /// Creates a drainer with a watermark of 0.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::InvalidConfig`] for a zero batch size or interval.
    pub fn new(
        spool: Arc<SpoolStore>,
        dedupe: Arc<DedupeStore>,
        emitter: Arc<dyn Emitter>,
        config: DrainConfig,
    ) -> Result<Self, DrainError> {
        if config.batch_size == 0 {
            return Err(DrainError::InvalidConfig("batch_size must be > 0".into()));
        }
        if config.interval.is_zero() {
            return Err(DrainError::InvalidConfig("interval must be > 0".into()));
        }

        Ok(Drainer {
            spool,
            dedupe,
            emitter,
            config,
            watermark: AtomicU64::new(0),
            retry: Mutex::new(BTreeMap::new()),
            draining: AtomicBool::new(false),
            on_error: Arc::new(|failure: &DrainFailure| {
                error!(failure = %failure, "Drain failure");
            }),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Seeds the watermark, e.g. from a value the host persisted.
    pub fn with_watermark(self, watermark: u64) -> Self {
        self.watermark.store(watermark, Ordering::SeqCst);
        self
    }

    /// Replaces the default callback, which logs at error level.
    pub fn with_error_callback(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Sequences that failed and will be offered again next cycle.
    pub fn pending_retries(&self) -> Vec<u64> {
        self.retry().keys().copied().collect()
    }

    /// The highest sequence below which every entry is resolved.
    ///
    /// Equal to [`watermark`](Self::watermark) when nothing is pending.
    pub fn resume_watermark(&self) -> u64 {
        let watermark = self.watermark();
        match self.retry().keys().next() {
            Some(&lowest) => watermark.min(lowest - 1),
            None => watermark,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Runs one drain cycle.
    ///
    /// Per-entry failures are reported to the error callback and listed in
    /// the report; they do not fail the cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only if the spool could not be read.
    pub async fn poll(&self) -> Result<DrainReport, DrainError> {
        let Some(_guard) = DrainGuard::try_acquire(&self.draining) else {
            debug!("Drain cycle already in flight, skipping");
            return Ok(DrainReport {
                busy: true,
                watermark: self.watermark(),
                ..DrainReport::default()
            });
        };

        let start = self.watermark();
        let mut report = DrainReport {
            watermark: start,
            ..DrainReport::default()
        };

        // Cycles never overlap, so the set can't change while this one runs.
        let retries: Vec<SpoolEntry> = self.retry().values().cloned().collect();
        for entry in retries {
            let sequence = entry.sequence;
            if self.drain_entry(entry, &mut report).await.is_none() {
                self.retry().remove(&sequence);
            }
        }

        if self.spool.sequence() > start {
            let entries = self.spool.read(start + 1, Some(self.config.batch_size))?;

            let mut watermark = start;
            for entry in entries {
                if entry.sequence <= start {
                    continue;
                }
                watermark = watermark.max(entry.sequence);
                if let Some(failed) = self.drain_entry(entry, &mut report).await {
                    self.retry().insert(failed.sequence, failed);
                }
            }

            self.watermark.fetch_max(watermark, Ordering::SeqCst);
        }

        report.watermark = self.watermark();
        report.pending_retries = self.retry().len();

        if !report.emitted.is_empty() || !report.failures.is_empty() {
            info!(
                emitted = report.emitted.len(),
                skipped = report.skipped.len(),
                failed = report.failures.len(),
                watermark = report.watermark,
                pending_retries = report.pending_retries,
                "Drain cycle complete"
            );
        }

        Ok(report)
    }

    /// Starts the background loop on the current Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), DrainError> {
        let handle = Handle::try_current().map_err(|_| DrainError::NoRuntime)?;
        if self.shutdown.is_cancelled() {
            return Err(DrainError::Stopped);
        }

        let mut task = self.task();
        if task.is_some() {
            return Err(DrainError::AlreadyStarted);
        }

        let drainer = Arc::clone(self);
        *task = Some(handle.spawn(async move { drainer.run().await }));
        info!(
            batch_size = self.config.batch_size,
            interval_ms = self.config.interval.as_millis() as u64,
            "Drain loop started"
        );
        Ok(())
    }

    /// Stops the background loop and waits for an in-flight cycle to finish.
    ///
    /// Safe to call more than once, or without [`start`](Self::start).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Drain task ended abnormally");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Drain loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        (self.on_error)(&DrainFailure::Cycle { error: e.to_string() });
                    }
                }
            }
        }
    }

    /// Skips or emits one entry, recording the outcome in `report`.
    ///
    /// Hands the entry back if it is still unresolved.
    async fn drain_entry(&self, entry: SpoolEntry, report: &mut DrainReport) -> Option<SpoolEntry> {
        let sequence = entry.sequence;
        if self.dedupe.is_emitted(entry.action_id()) {
            debug!(sequence, action_id = %entry.action_id(), "Already emitted, skipping");
            report.skipped.push(sequence);
            return None;
        }

        match self.emit_one(&entry).await {
            Ok(()) => {
                report.emitted.push(entry);
                None
            }
            Err(failure) => {
                (self.on_error)(&failure);
                report.failures.push(failure);
                Some(entry)
            }
        }
    }

    async fn emit_one(&self, entry: &SpoolEntry) -> Result<(), DrainFailure> {
        if let Err(e) = self.emitter.emit(entry).await {
            return Err(DrainFailure::Emit {
                sequence: entry.sequence,
                action_id: entry.action_id().clone(),
                error: e.to_string(),
            });
        }

        self.record_emitted(entry).map_err(|e| DrainFailure::Record {
            sequence: entry.sequence,
            action_id: entry.action_id().clone(),
            error: e.to_string(),
        })
    }

    /// Durably records the action as emitted.
    ///
    /// An action captured outside the dedupe index is inserted as emitted.
    fn record_emitted(&self, entry: &SpoolEntry) -> Result<(), DedupeError> {
        let action_id = entry.action_id();
        if !self.dedupe.mark_emitted(action_id)? {
            self.dedupe
                .set(action_id, DedupeEntry::emitted(entry.sequence, Utc::now()))?;
        }
        self.dedupe.commit()
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retry(&self) -> MutexGuard<'_, BTreeMap<u64, SpoolEntry>> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Drainer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
