use super::entry::DedupeEntry;
use super::error::Result;
use super::file::{DedupeConfig, DedupeStats, FileDedupeIndex};
use super::index::DedupeIndex;
use super::memory::MemoryDedupeIndex;
use crate::types::ActionId;

/// The dedupe backend chosen at construction.
///
/// Durability is a property of the backend, so [`commit`](Self::commit) and
/// [`stats`](Self::stats) live here rather than on [`DedupeIndex`].
#[derive(Debug)]
pub enum DedupeStore {
    File(FileDedupeIndex),
    Memory(MemoryDedupeIndex),
}

impl DedupeStore {
    pub fn open(config: DedupeConfig) -> Result<Self> {
        Ok(DedupeStore::File(FileDedupeIndex::open(config)?))
    }

    pub fn memory() -> Self {
        DedupeStore::Memory(MemoryDedupeIndex::new())
    }

    /// Forces durability. A no-op for the memory backend.
    pub fn commit(&self) -> Result<()> {
        match self {
            DedupeStore::File(index) => index.commit(),
            DedupeStore::Memory(_) => Ok(()),
        }
    }

    /// Log counters, for backends that keep a log.
    pub fn stats(&self) -> Option<DedupeStats> {
        match self {
            DedupeStore::File(index) => Some(index.stats()),
            DedupeStore::Memory(_) => None,
        }
    }

    fn index(&self) -> &dyn DedupeIndex {
        match self {
            DedupeStore::File(index) => index,
            DedupeStore::Memory(index) => index,
        }
    }
}

impl DedupeIndex for DedupeStore {
    fn get(&self, action_id: &ActionId) -> Option<DedupeEntry> {
        self.index().get(action_id)
    }

    fn set(&self, action_id: &ActionId, entry: DedupeEntry) -> Result<()> {
        self.index().set(action_id, entry)
    }

    fn has(&self, action_id: &ActionId) -> bool {
        self.index().has(action_id)
    }

    fn mark_emitted(&self, action_id: &ActionId) -> Result<bool> {
        self.index().mark_emitted(action_id)
    }

    fn delete(&self, action_id: &ActionId) -> Result<bool> {
        self.index().delete(action_id)
    }

    fn size(&self) -> usize {
        self.index().size()
    }

    fn clear(&self) -> Result<()> {
        self.index().clear()
    }
}
