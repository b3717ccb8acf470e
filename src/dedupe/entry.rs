//! Dedupe entries and the operation log record format.
//!
//! Each line of `dedupe.idx` is one [`DedupeOp`]:
//!
//! ```json
//! {"op":"set","actionId":"a1","entry":{"emitted":false,"sequence":1}}
//! {"op":"emit","actionId":"a1","ts":"2026-01-01T00:00:00Z"}
//! {"op":"delete","actionId":"a1"}
//! {"op":"clear"}
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ActionId;

/// Emission state of one action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeEntry {
    /// True once a receipt for the action was durably written.
    #[serde(default)]
    pub emitted: bool,

    /// Spool sequence of the entry that captured the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<DateTime<Utc>>,

    /// Fields written by other producers, preserved across rewrites.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DedupeEntry {
    /// An action captured at `sequence` with no receipt yet.
    pub fn pending(sequence: u64) -> Self {
        DedupeEntry {
            emitted: false,
            sequence: Some(sequence),
            emitted_at: None,
            extra: Map::new(),
        }
    }

    /// An action whose receipt was written at `at`.
    pub fn emitted(sequence: u64, at: DateTime<Utc>) -> Self {
        DedupeEntry {
            emitted: true,
            sequence: Some(sequence),
            emitted_at: Some(at),
            extra: Map::new(),
        }
    }
}

/// One record of the dedupe operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DedupeOp {
    Set {
        #[serde(rename = "actionId")]
        action_id: ActionId,
        entry: DedupeEntry,
    },
    Emit {
        #[serde(rename = "actionId")]
        action_id: ActionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    Delete {
        #[serde(rename = "actionId")]
        action_id: ActionId,
    },
    Clear,
}

impl DedupeOp {
    /// Applies the operation to an in-memory map.
    ///
    /// `emit` on a missing key is a no-op, which tolerates a `set` lost to a
    /// crash. Applying the same record twice yields the same map.
    pub fn apply(self, entries: &mut HashMap<ActionId, DedupeEntry>) {
        match self {
            DedupeOp::Set { action_id, entry } => {
                entries.insert(action_id, entry);
            }
            DedupeOp::Emit { action_id, ts } => {
                if let Some(entry) = entries.get_mut(&action_id) {
                    entry.emitted = true;
                    if entry.emitted_at.is_none() {
                        entry.emitted_at = ts;
                    }
                }
            }
            DedupeOp::Delete { action_id } => {
                entries.remove(&action_id);
            }
            DedupeOp::Clear => entries.clear(),
        }
    }

    /// Serializes the operation as a newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
