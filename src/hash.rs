//! Entry digest computation.
//!
//! The spool never computes digests; it only compares them. Producers chain
//! entries with an [`EntryHasher`], and [`Sha256Hasher`] is the reference one:
//!
//! ```text
//! entry_digest = "sha256:" + hex(SHA-256(prev_entry_digest || "\n" || canonical action JSON))
//! ```

use sha2::{Digest as _, Sha256};

use crate::types::{Action, Digest, SpoolEntry};

/// Computes the digest of a candidate entry.
pub trait EntryHasher: Send + Sync {
    fn digest(&self, prev: &Digest, payload: &[u8]) -> Digest;
}

/// SHA-256 over the previous digest and the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl EntryHasher for Sha256Hasher {
    fn digest(&self, prev: &Digest, payload: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(prev.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(payload);
        Digest(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

/// Builds the entry that follows `prev` at `sequence`.
pub fn chain_entry(
    hasher: &dyn EntryHasher,
    sequence: u64,
    prev: Digest,
    action: Action,
) -> serde_json::Result<SpoolEntry> {
    let payload = action.canonical_bytes()?;
    let entry_digest = hasher.digest(&prev, &payload);
    Ok(SpoolEntry {
        sequence,
        prev_entry_digest: prev,
        entry_digest,
        action,
    })
}

/// True if `entry.entry_digest` is what `hasher` computes for it.
///
/// Linkage to the predecessor is checked by the spool, not here.
pub fn verify_entry(hasher: &dyn EntryHasher, entry: &SpoolEntry) -> bool {
    match entry.action.canonical_bytes() {
        Ok(payload) => hasher.digest(&entry.prev_entry_digest, &payload) == entry.entry_digest,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_has_algorithm_prefix_and_full_hex() {
        let d = Sha256Hasher.digest(&Digest::genesis(), b"{}");
        assert!(d.as_str().starts_with("sha256:"));
        assert_eq!(d.as_str().len(), "sha256:".len() + 64);
    }

    #[test]
    fn chained_entry_verifies() {
        let entry = chain_entry(&Sha256Hasher, 1, Digest::genesis(), Action::new("a1")).unwrap();
        assert!(verify_entry(&Sha256Hasher, &entry));
    }

    #[test]
    fn edited_action_fails_verification() {
        let mut entry =
            chain_entry(&Sha256Hasher, 1, Digest::genesis(), Action::new("a1")).unwrap();
        entry.action = entry.action.with_field("tool", "rm");
        assert!(!verify_entry(&Sha256Hasher, &entry));
    }

    proptest! {
        #[test]
        fn digest_depends_on_prev(payload in prop::collection::vec(any::<u8>(), 0..64)) {
            let a = Sha256Hasher.digest(&Digest::genesis(), &payload);
            let b = Sha256Hasher.digest(&Digest::new("sha256:other"), &payload);
            prop_assert_ne!(a, b);
        }
    }
}
