//! Spool entry types.
//!
//! Each entry is serialized as one JSON object per line in `spool.jsonl`:
//!
//! ```json
//! {"sequence":1,"prev_entry_digest":"sha256:00..","entry_digest":"sha256:9f..","action":{"id":"a1","tool":"fetch"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{ActionId, Digest};

/// A captured action.
///
/// Only `id` is interpreted by the spool. Everything else is carried opaquely
/// and must be shape-checked by the producer before it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identity of the action; the dedupe key.
    pub id: ActionId,

    /// Remaining fields of the action object.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Action {
    /// Creates an action with an empty body.
    pub fn new(id: impl Into<ActionId>) -> Self {
        Action {
            id: id.into(),
            body: Map::new(),
        }
    }

    /// Adds a body field, replacing any previous value for `key`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Canonical bytes of the action, used as hasher input.
    ///
    /// `serde_json::Map` is ordered by key, so equal actions always produce
    /// equal bytes.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One record of the hash-chained spool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolEntry {
    /// Position in the chain, starting at 1.
    pub sequence: u64,

    /// Digest of the preceding entry, or the genesis digest for sequence 1.
    pub prev_entry_digest: Digest,

    /// Digest of this entry, computed by the producer's hasher.
    pub entry_digest: Digest,

    /// The captured action.
    pub action: Action,
}

impl SpoolEntry {
    /// Returns the action identity.
    pub fn action_id(&self) -> &ActionId {
        &self.action.id
    }

    /// Serializes the entry as a newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> SpoolEntry {
        SpoolEntry {
            sequence: 1,
            prev_entry_digest: Digest::genesis(),
            entry_digest: Digest::new("sha256:abcd"),
            action: Action::new("a1")
                .with_field("tool", "fetch")
                .with_field("args", serde_json::json!({"url": "https://example.com"})),
        }
    }

    #[test]
    fn entry_line_is_single_terminated_line() {
        let line = sample_entry().to_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn action_fields_are_flattened_next_to_id() {
        let json = serde_json::to_value(sample_entry()).unwrap();
        assert_eq!(json["action"]["id"], "a1");
        assert_eq!(json["action"]["tool"], "fetch");
        assert_eq!(json["sequence"], 1);
        assert!(json["prev_entry_digest"].as_str().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn unknown_action_fields_survive_parsing() {
        let line = r#"{"sequence":3,"prev_entry_digest":"sha256:aa","entry_digest":"sha256:bb","action":{"id":"x","nested":{"k":[1,2]}}}"#;
        let entry: SpoolEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.action_id().as_str(), "x");
        assert_eq!(entry.action.body["nested"]["k"][1], 2);
    }

    #[test]
    fn action_without_id_is_rejected() {
        let line = r#"{"sequence":1,"prev_entry_digest":"a","entry_digest":"b","action":{"tool":"x"}}"#;
        assert!(serde_json::from_str::<SpoolEntry>(line).is_err());
    }

    #[test]
    fn canonical_bytes_ignore_insertion_order() {
        let a = Action::new("a").with_field("x", 1).with_field("y", 2);
        let b = Action::new("a").with_field("y", 2).with_field("x", 1);
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }
}
