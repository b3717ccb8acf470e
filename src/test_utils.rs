//! Shared test utilities and arbitrary generators for property-based testing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use proptest::prelude::*;
use serde_json::Value;

use crate::hash::{Sha256Hasher, chain_entry};
use crate::spool::{SpoolConfig, SpoolStore};
use crate::types::{Action, ActionId, Digest, SpoolEntry};

pub fn arb_action_id() -> impl Strategy<Value = ActionId> {
    "[a-zA-Z0-9_-]{1,24}".prop_map(ActionId::new)
}

pub fn arb_field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,32}".prop_map(Value::from),
    ]
}

pub fn arb_action() -> impl Strategy<Value = Action> {
    (
        arb_action_id(),
        prop::collection::btree_map("[a-z]{1,8}", arb_field_value(), 0..4),
    )
        .prop_map(|(id, fields)| {
            fields
                .into_iter()
                // `id` is the identity field and can't also be a body field.
                .filter(|(k, _)| k != "id")
                .fold(Action::new(id), |action, (k, v)| action.with_field(k, v))
        })
}

/// Builds a valid chain with one entry per action id, starting at genesis.
pub fn build_chain(ids: &[&str]) -> Vec<SpoolEntry> {
    let mut prev = Digest::genesis();
    let mut entries = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let entry = chain_entry(&Sha256Hasher, i as u64 + 1, prev, Action::new(*id)).unwrap();
        prev = entry.entry_digest.clone();
        entries.push(entry);
    }
    entries
}

/// Appends entries to `path` as raw lines, bypassing the store.
pub fn write_entries(path: &Path, entries: &[SpoolEntry]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for entry in entries {
        file.write_all(&entry.to_line().unwrap()).unwrap();
    }
}

/// Builds the entry that would follow the store's current head.
pub fn next_entry(store: &SpoolStore, action: Action) -> SpoolEntry {
    chain_entry(&Sha256Hasher, store.sequence() + 1, store.head_digest(), action).unwrap()
}

/// Appends one entry per id through the store.
pub fn append_ids(store: &SpoolStore, ids: &[&str]) -> Vec<SpoolEntry> {
    ids.iter()
        .map(|id| {
            let entry = next_entry(store, Action::new(*id));
            store.append(&entry).unwrap();
            entry
        })
        .collect()
}

/// A spool config at `<dir>/spool.jsonl` with default caps.
pub fn spool_config(dir: &Path) -> SpoolConfig {
    SpoolConfig::new(dir.join("spool.jsonl"))
}
