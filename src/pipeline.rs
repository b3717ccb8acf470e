//! One directory, one pipeline: capture, spool, dedupe and drain wired
//! together.
//!
//! ```text
//! <dir>/
//!   spool.jsonl
//!   spool.jsonl.meta.json
//!   spool.jsonl.lock
//!   dedupe.idx
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::capture::ActionCapture;
use crate::dedupe::{DedupeConfig, DedupeError, DedupeIndex, DedupeStats, DedupeStore};
use crate::drain::{DrainConfig, DrainError, DrainReport, Drainer, Emitter};
use crate::hash::{EntryHasher, Sha256Hasher};
use crate::spool::{SpoolConfig, SpoolDiagnostics, SpoolError, SpoolStore};
use crate::types::{Action, SpoolEntry};

/// File name of the spool inside the pipeline directory.
pub const SPOOL_FILE: &str = "spool.jsonl";

/// File name of the dedupe log inside the pipeline directory.
pub const DEDUPE_FILE: &str = "dedupe.idx";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Spool(#[from] SpoolError),

    #[error(transparent)]
    Dedupe(#[from] DedupeError),

    #[error(transparent)]
    Drain(#[from] DrainError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Configuration for a [`ReceiptPipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub dir: PathBuf,
    pub spool: SpoolConfig,
    pub dedupe: DedupeConfig,
    pub drain: DrainConfig,
}

impl PipelineConfig {
    /// Default settings for every component under `dir`. Auto-commit is off.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        PipelineConfig {
            spool: SpoolConfig::new(dir.join(SPOOL_FILE)),
            dedupe: DedupeConfig::new(dir.join(DEDUPE_FILE)),
            drain: DrainConfig::new(),
            dir,
        }
    }

    /// Like [`new`](Self::new), with spool and drain overrides from the
    /// environment. Auto-commit defaults to on, so opening needs a runtime.
    pub fn from_env(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        PipelineConfig {
            spool: SpoolConfig::from_env(dir.join(SPOOL_FILE)),
            dedupe: DedupeConfig::new(dir.join(DEDUPE_FILE)),
            drain: DrainConfig::from_env(),
            dir,
        }
    }
}

/// Combined operator view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDiagnostics {
    pub spool: SpoolDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe: Option<DedupeStats>,
    pub watermark: u64,
    pub pending_retries: usize,
    pub draining: bool,
}

/// The assembled capture-to-receipt pipeline.
pub struct ReceiptPipeline {
    dir: PathBuf,
    spool: Arc<SpoolStore>,
    dedupe: Arc<DedupeStore>,
    capture: ActionCapture,
    drainer: Arc<Drainer>,
}

impl ReceiptPipeline {
    /// Opens every component with the reference SHA-256 hasher.
    pub fn open(config: PipelineConfig, emitter: Arc<dyn Emitter>) -> Result<Self> {
        Self::open_with_hasher(config, emitter, Arc::new(Sha256Hasher))
    }

    /// Opens every component. On failure, anything already opened is closed
    /// again, so the spool lock is not held.
    #[instrument(skip_all, fields(dir = %config.dir.display()))]
    pub fn open_with_hasher(
        config: PipelineConfig,
        emitter: Arc<dyn Emitter>,
        hasher: Arc<dyn EntryHasher>,
    ) -> Result<Self> {
        let spool = Arc::new(SpoolStore::open(config.spool)?);

        let dedupe = match DedupeStore::open(config.dedupe) {
            Ok(dedupe) => Arc::new(dedupe),
            Err(e) => {
                spool.close();
                return Err(e.into());
            }
        };

        let drainer = match Drainer::new(
            Arc::clone(&spool),
            Arc::clone(&dedupe),
            emitter,
            config.drain,
        ) {
            Ok(drainer) => Arc::new(drainer),
            Err(e) => {
                spool.close();
                return Err(e.into());
            }
        };

        let capture = ActionCapture::new(Arc::clone(&spool), Arc::clone(&dedupe), hasher);

        info!(
            sequence = spool.sequence(),
            indexed = dedupe.size(),
            "Pipeline opened"
        );

        Ok(ReceiptPipeline {
            dir: config.dir,
            spool,
            dedupe,
            capture,
            drainer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn spool(&self) -> &Arc<SpoolStore> {
        &self.spool
    }

    pub fn dedupe(&self) -> &Arc<DedupeStore> {
        &self.dedupe
    }

    pub fn drainer(&self) -> &Arc<Drainer> {
        &self.drainer
    }

    /// Captures an action. Durable after the next [`commit`](Self::commit).
    pub fn record(&self, action: Action) -> Result<SpoolEntry> {
        Ok(self.capture.capture(action)?)
    }

    /// Commits the spool, then the dedupe log.
    pub fn commit(&self) -> Result<()> {
        self.spool.commit()?;
        self.dedupe.commit()?;
        Ok(())
    }

    /// Runs one drain cycle now.
    pub async fn drain(&self) -> Result<DrainReport> {
        Ok(self.drainer.poll().await?)
    }

    /// Starts the background drain loop.
    pub fn start(&self) -> Result<()> {
        Ok(self.drainer.start()?)
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        PipelineDiagnostics {
            spool: self.spool.diagnostics(),
            dedupe: self.dedupe.stats(),
            watermark: self.drainer.watermark(),
            pending_retries: self.drainer.pending_retries().len(),
            draining: self.drainer.is_draining(),
        }
    }

    /// Stops draining, closes the spool, then commits the dedupe log.
    ///
    /// Idempotent. Failures along the way are logged.
    pub async fn close(&self) {
        self.drainer.stop().await;
        self.spool.close();
        if let Err(e) = self.dedupe.commit() {
            warn!(error = %e, "Final dedupe commit failed");
        }
    }
}
