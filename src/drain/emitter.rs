use async_trait::async_trait;
use thiserror::Error;

use crate::types::SpoolEntry;

/// Why an entry could not be turned into a receipt.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("signing failed: {0}")]
    Sign(String),

    #[error("receipt write failed: {0}")]
    Write(#[from] std::io::Error),

    /// The action id can't be used as a receipt name.
    #[error("invalid action id for receipt: {0}")]
    InvalidActionId(String),
}

/// Turns a spool entry into a durably written receipt.
///
/// `Ok(())` means the receipt is on stable storage. The drainer only records
/// the action as emitted after that.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, entry: &SpoolEntry) -> Result<(), EmitError>;
}
