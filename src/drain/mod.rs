//! Turning spool entries into receipts, exactly once per action.
//!
//! ```text
//! SpoolStore --read(watermark+1, batch)--> Drainer --emit--> Emitter
//!                                            |
//!                                            +--mark_emitted + commit--> DedupeStore
//! ```

pub mod config;
pub mod drainer;
pub mod emitter;


pub use config::DrainConfig;
pub use drainer::{DrainError, DrainFailure, DrainReport, Drainer, ErrorCallback};
pub use emitter::{EmitError, Emitter};
