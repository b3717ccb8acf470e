//! Restart-safe dedupe index keyed by action identity.
//!
//! The drainer consults this index before emitting a receipt and records
//! every confirmed receipt in it, which is what makes emission idempotent
//! across restarts. The spool stays the source of truth: losing part of the
//! index costs redundant receipts, never lost evidence.
//!
//! Backends are chosen at construction through [`DedupeStore`].

pub mod entry;
pub mod error;
pub mod file;
pub mod index;
pub mod memory;
pub mod store;

pub use entry::{DedupeEntry, DedupeOp};
pub use error::{DedupeError, Result};
pub use file::{DedupeConfig, DedupeStats, FileDedupeIndex};
pub use index::DedupeIndex;
pub use memory::MemoryDedupeIndex;
pub use store::DedupeStore;
