//! File-level building blocks shared by the spool and the dedupe index.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   spool.jsonl             # hash-chained entries (JSON Lines)
//!   spool.jsonl.meta.json   # cached derived state for fast restart
//!   spool.jsonl.lock        # single-writer lock marker
//!   dedupe.idx              # dedupe operation log (JSON Lines)
//! ```
//!
//! # Crash Safety
//!
//! - JSON Lines files: a torn final line is detected by the bounded reader
//!   and truncated on open; anything torn before the final line is treated
//!   as corruption by the spool
//! - Meta snapshots: written atomically using write-to-temp-then-rename
//! - Directory fsyncs: best-effort, reported through [`BestEffort`]

pub mod fsync;
pub mod lines;
pub mod lock;
pub mod meta;

pub use fsync::{BestEffort, fsync_dir, fsync_file, fsync_parent_dir};
pub use lines::{BoundedLines, DEFAULT_MAX_LINE_BYTES, LineRead, RawLine};
pub use lock::{LockError, SpoolLock, lock_path_for};
pub use meta::{META_VERSION, MetaError, SpoolMeta, load_trusted_meta, meta_path_for, save_meta_atomic};
