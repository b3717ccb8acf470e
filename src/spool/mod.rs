//! Hash-chained, append-only action spool.
//!
//! Each line of `spool.jsonl` is one [`SpoolEntry`](crate::types::SpoolEntry)
//! linked to its predecessor by `prev_entry_digest`:
//!
//! ```text
//! e1.prev_entry_digest == GENESIS_DIGEST
//! ei.prev_entry_digest == e(i-1).entry_digest
//! ```
//!
//! # Durability
//!
//! - `append` writes without fsync; `commit` fsyncs, then refreshes the meta
//!   snapshot (best-effort)
//! - The first commit after creating the file also fsyncs its directory
//!   (best-effort)
//! - An optional auto-commit task bounds the unsynced window
//!
//! # Recovery
//!
//! On open a trusted meta snapshot skips the scan. Otherwise every line is
//! re-verified from genesis (see [`recovery`]). A torn final line is
//! truncated; any other anomaly makes the store read-only with a
//! [`CorruptionReason`], and nothing in the file is rewritten.
//!
//! # Hard Caps
//!
//! Entry count and file size are capped. Once a cap is hit every append
//! fails with [`SpoolError::Full`].

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod recovery;
pub mod store;


pub use config::{DEFAULT_AUTO_COMMIT_MS, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_FILE_BYTES, SpoolConfig};
pub use diagnostics::{RecoverySource, SpoolDiagnostics, SpoolMode};
pub use error::{Corruption, CorruptionReason, HardCap, Result, SpoolError};
pub use recovery::{ScanOutcome, scan_spool};
pub use store::SpoolStore;
