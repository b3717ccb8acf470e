//! Core domain types for the action spool.

pub mod entry;
pub mod ids;

pub use entry::{Action, SpoolEntry};
pub use ids::{ActionId, Digest, GENESIS_DIGEST};
