//! Volatile dedupe index for tests and ephemeral pipelines.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::entry::{DedupeEntry, DedupeOp};
use super::error::Result;
use super::index::DedupeIndex;
use crate::types::ActionId;

/// An in-memory [`DedupeIndex`]. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryDedupeIndex {
    entries: Mutex<HashMap<ActionId, DedupeEntry>>,
}

impl MemoryDedupeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ActionId, DedupeEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DedupeIndex for MemoryDedupeIndex {
    fn get(&self, action_id: &ActionId) -> Option<DedupeEntry> {
        self.entries().get(action_id).cloned()
    }

    fn set(&self, action_id: &ActionId, entry: DedupeEntry) -> Result<()> {
        DedupeOp::Set {
            action_id: action_id.clone(),
            entry,
        }
        .apply(&mut self.entries());
        Ok(())
    }

    fn mark_emitted(&self, action_id: &ActionId) -> Result<bool> {
        let mut entries = self.entries();
        if !entries.contains_key(action_id) {
            return Ok(false);
        }
        DedupeOp::Emit {
            action_id: action_id.clone(),
            ts: Some(Utc::now()),
        }
        .apply(&mut entries);
        Ok(true)
    }

    fn delete(&self, action_id: &ActionId) -> Result<bool> {
        Ok(self.entries().remove(action_id).is_some())
    }

    fn size(&self) -> usize {
        self.entries().len()
    }

    fn clear(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_emitted_unknown_returns_false() {
        let index = MemoryDedupeIndex::new();
        assert!(!index.mark_emitted(&ActionId::new("a1")).unwrap());
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn mark_emitted_twice_is_idempotent() {
        let index = MemoryDedupeIndex::new();
        let id = ActionId::new("a1");
        index.set(&id, DedupeEntry::pending(1)).unwrap();

        assert!(index.mark_emitted(&id).unwrap());
        let first = index.get(&id).unwrap();
        assert!(index.mark_emitted(&id).unwrap());

        assert_eq!(index.get(&id).unwrap(), first);
        assert!(index.is_emitted(&id));
    }

    #[test]
    fn delete_and_clear() {
        let index = MemoryDedupeIndex::new();
        index.set(&ActionId::new("a1"), DedupeEntry::pending(1)).unwrap();
        index.set(&ActionId::new("a2"), DedupeEntry::pending(2)).unwrap();

        assert!(index.delete(&ActionId::new("a1")).unwrap());
        assert!(!index.delete(&ActionId::new("a1")).unwrap());
        assert_eq!(index.size(), 1);

        index.clear().unwrap();
        assert_eq!(index.size(), 0);
        assert!(!index.has(&ActionId::new("a2")));
    }
}
