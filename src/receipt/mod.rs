//! Receipt production: the emitter side of the drain pipeline.
//!
//! Receipts live in their own directory, one `<actionId>.json` per action:
//!
//! ```text
//! <receipts>/
//!   a1.json          # signed receipt
//!   .a2.json.tmp     # write in progress (removed by rename)
//! ```
//!
//! Re-emitting an action replaces its receipt atomically.

pub mod emitter;
pub mod writer;

pub use emitter::{HmacSigner, Receipt, ReceiptBody, ReceiptEmitter, Signer};
pub use writer::{AtomicWriter, WriteError, validate_name};
