//! Signed receipts written as one JSON file per action.
//!
//! ```json
//! {"actionId":"a1","sequence":1,"entryDigest":"sha256:..","prevEntryDigest":"sha256:..","issuedAt":"2026-01-01T00:00:00Z","signature":"hmac-sha256:.."}
//! ```
//!
//! The signature covers the JSON of every other field, serialized in the
//! order above.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::writer::{AtomicWriter, WriteError};
use crate::drain::{EmitError, Emitter};
use crate::types::{ActionId, Digest, SpoolEntry};

type HmacSha256 = Hmac<Sha256>;

/// Signs receipt payloads.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<String, EmitError>;
}

/// HMAC-SHA256 with a shared key. Signatures are `hmac-sha256:<hex>`.
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        HmacSigner { key: key.into() }
    }

    /// Checks `signature` against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Some(raw) = signature
            .strip_prefix("hmac-sha256:")
            .and_then(|h| hex::decode(h).ok())
        else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, payload: &[u8]) -> Result<String, EmitError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| EmitError::Sign(e.to_string()))?;
        mac.update(payload);
        Ok(format!("hmac-sha256:{}", hex::encode(mac.finalize().into_bytes())))
    }
}

/// The signed part of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptBody {
    pub action_id: ActionId,
    pub sequence: u64,
    pub entry_digest: Digest,
    pub prev_entry_digest: Digest,
    pub issued_at: DateTime<Utc>,
}

impl ReceiptBody {
    pub fn for_entry(entry: &SpoolEntry, issued_at: DateTime<Utc>) -> Self {
        ReceiptBody {
            action_id: entry.action_id().clone(),
            sequence: entry.sequence,
            entry_digest: entry.entry_digest.clone(),
            prev_entry_digest: entry.prev_entry_digest.clone(),
            issued_at,
        }
    }
}

/// A receipt as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(flatten)]
    pub body: ReceiptBody,
    pub signature: String,
}

impl Receipt {
    /// Reads a receipt file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(std::io::Error::other)
    }

    /// Bytes covered by the signature.
    pub fn signed_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.body)
    }
}

/// An [`Emitter`] that signs each entry and writes `<actionId>.json`.
#[derive(Debug)]
pub struct ReceiptEmitter<S: Signer> {
    writer: AtomicWriter,
    signer: S,
}

impl<S: Signer> ReceiptEmitter<S> {
    pub fn new(writer: AtomicWriter, signer: S) -> Self {
        ReceiptEmitter { writer, signer }
    }

    pub fn receipt_path(&self, action_id: &ActionId) -> std::path::PathBuf {
        self.writer.dir().join(format!("{action_id}.json"))
    }

    fn build(&self, entry: &SpoolEntry) -> Result<Receipt, EmitError> {
        let body = ReceiptBody::for_entry(entry, Utc::now());
        let payload = serde_json::to_vec(&body).map_err(|e| EmitError::Sign(e.to_string()))?;
        let signature = self.signer.sign(&payload)?;
        Ok(Receipt { body, signature })
    }
}

#[async_trait]
impl<S: Signer> Emitter for ReceiptEmitter<S> {
    async fn emit(&self, entry: &SpoolEntry) -> Result<(), EmitError> {
        let receipt = self.build(entry)?;
        let bytes = serde_json::to_vec(&receipt).map_err(|e| EmitError::Sign(e.to_string()))?;

        let name = format!("{}.json", entry.action_id());
        match self.writer.write(&name, &bytes) {
            Ok(path) => {
                debug!(path = %path.display(), sequence = entry.sequence, "Receipt written");
                Ok(())
            }
            Err(WriteError::InvalidName(_)) => {
                Err(EmitError::InvalidActionId(entry.action_id().to_string()))
            }
            Err(WriteError::Io(e)) => Err(EmitError::Write(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_chain;
    use tempfile::tempdir;

    fn emitter(dir: &Path) -> ReceiptEmitter<HmacSigner> {
        ReceiptEmitter::new(AtomicWriter::new(dir), HmacSigner::new(b"test-key".to_vec()))
    }

    #[tokio::test]
    async fn writes_verifiable_receipt() {
        let dir = tempdir().unwrap();
        let emitter = emitter(dir.path());
        let entry = build_chain(&["a1"]).remove(0);

        emitter.emit(&entry).await.unwrap();

        let receipt = Receipt::load(&emitter.receipt_path(entry.action_id())).unwrap();
        assert_eq!(receipt.body.sequence, 1);
        assert_eq!(receipt.body.entry_digest, entry.entry_digest);
        assert!(receipt.body.prev_entry_digest.is_genesis());

        let signer = HmacSigner::new(b"test-key".to_vec());
        assert!(signer.verify(&receipt.signed_bytes().unwrap(), &receipt.signature));
        assert!(!HmacSigner::new(b"other".to_vec())
            .verify(&receipt.signed_bytes().unwrap(), &receipt.signature));
    }

    #[tokio::test]
    async fn receipt_uses_camel_case_fields() {
        let dir = tempdir().unwrap();
        let emitter = emitter(dir.path());
        let entry = build_chain(&["a1"]).remove(0);
        emitter.emit(&entry).await.unwrap();

        let raw = std::fs::read(dir.path().join("a1.json")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        for field in ["actionId", "sequence", "entryDigest", "prevEntryDigest", "issuedAt", "signature"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn unsafe_action_id_is_rejected() {
        let dir = tempdir().unwrap();
        let emitter = emitter(dir.path());
        let entry = build_chain(&["../escape"]).remove(0);

        assert!(matches!(
            emitter.emit(&entry).await,
            Err(EmitError::InvalidActionId(_))
        ));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let signer = HmacSigner::new(b"k".to_vec());
        let entry = build_chain(&["a1"]).remove(0);
        let body = ReceiptBody::for_entry(&entry, Utc::now());
        let signature = signer.sign(&serde_json::to_vec(&body).unwrap()).unwrap();

        let mut tampered = body.clone();
        tampered.sequence = 2;
        assert!(!signer.verify(&serde_json::to_vec(&tampered).unwrap(), &signature));
    }
}
