use super::entry::DedupeEntry;
use super::error::Result;
use crate::types::ActionId;

/// A map from action identity to emission state.
///
/// Implementations use interior mutability so one index can be shared by
/// the capture path and the drainer.
pub trait DedupeIndex: Send + Sync {
    fn get(&self, action_id: &ActionId) -> Option<DedupeEntry>;

    /// Inserts or overwrites the entry for `action_id`.
    fn set(&self, action_id: &ActionId, entry: DedupeEntry) -> Result<()>;

    fn has(&self, action_id: &ActionId) -> bool {
        self.get(action_id).is_some()
    }

    /// Marks the action emitted. Returns false if the action is unknown.
    fn mark_emitted(&self, action_id: &ActionId) -> Result<bool>;

    /// Removes the action. Returns false if it was not present.
    fn delete(&self, action_id: &ActionId) -> Result<bool>;

    fn size(&self) -> usize;

    fn clear(&self) -> Result<()>;

    /// True if a receipt for the action is known to be written.
    fn is_emitted(&self, action_id: &ActionId) -> bool {
        self.get(action_id).is_some_and(|e| e.emitted)
    }
}
