//! Newtype wrappers for spool identifiers.
//!
//! These types keep action identities and chain digests from being mixed up
//! with each other or with arbitrary strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The digest carried by the first entry of every spool.
///
/// `sha256:` followed by 64 zero hex digits.
pub const GENESIS_DIGEST: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// The identity of a captured action, used as the dedupe key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new(s: impl Into<String>) -> Self {
        ActionId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        ActionId(s)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        ActionId(s.to_string())
    }
}

/// A chain digest in `<algorithm>:<hex>` form.
///
/// The format is owned by the hasher that produced it; the spool only ever
/// compares digests for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(pub String);

impl Digest {
    pub fn new(s: impl Into<String>) -> Self {
        Digest(s.into())
    }

    /// Returns the sentinel digest linked to by sequence 1.
    pub fn genesis() -> Self {
        Digest(GENESIS_DIGEST.to_string())
    }

    pub fn is_genesis(&self) -> bool {
        self.0 == GENESIS_DIGEST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix of the hex part for log lines.
    pub fn short(&self) -> &str {
        let hex = self.0.split_once(':').map_or(self.0.as_str(), |(_, h)| h);
        hex.get(..12).unwrap_or(hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Digest {
    fn from(s: &str) -> Self {
        Digest(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn action_id_serializes_as_bare_string(s in "[a-zA-Z0-9_-]{1,40}") {
            let id = ActionId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(json, format!("\"{}\"", s));
        }

        #[test]
        fn digest_short_never_panics(s in "\\PC{0,80}") {
            let digest = Digest::new(s);
            prop_assert!(digest.short().len() <= digest.as_str().len());
        }
    }

    #[test]
    fn genesis_is_recognized() {
        assert!(Digest::genesis().is_genesis());
        assert!(!Digest::new("sha256:abc").is_genesis());
    }

    #[test]
    fn short_strips_algorithm_prefix() {
        let digest = Digest::new("sha256:0123456789abcdef0123");
        assert_eq!(digest.short(), "0123456789ab");
        assert_eq!(Digest::new("abc").short(), "abc");
    }
}
