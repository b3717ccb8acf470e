//! Action Spool - tamper-evident capture of actions with exactly-once receipts.
//!
//! Actions are appended to a hash-chained, single-writer spool file. A
//! drainer later turns each entry into a signed receipt, consulting a
//! restart-safe dedupe index so no action is receipted twice, even across
//! crashes.
//!
//! The building blocks can be used on their own ([`spool::SpoolStore`],
//! [`dedupe::DedupeStore`], [`drain::Drainer`]) or assembled from one
//! directory with [`pipeline::ReceiptPipeline`].

pub mod capture;
pub mod dedupe;
pub mod drain;
pub mod hash;
pub mod persistence;
pub mod pipeline;
pub mod receipt;
pub mod spool;
pub mod types;

#[cfg(test)]
pub mod test_utils;
