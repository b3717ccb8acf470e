//! Producer side: turning actions into chained spool entries.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::dedupe::{DedupeEntry, DedupeIndex, DedupeStore};
use crate::hash::{EntryHasher, chain_entry};
use crate::spool::{Result, SpoolStore};
use crate::types::{Action, SpoolEntry};

/// Appends actions to a spool, chaining each onto the current head.
///
/// Captures through one `ActionCapture` are serialized, so the head read and
/// the append can't interleave with another capture. Appends made directly
/// on the store in parallel are still caught by its chain validation.
pub struct ActionCapture {
    spool: Arc<SpoolStore>,
    dedupe: Arc<DedupeStore>,
    hasher: Arc<dyn EntryHasher>,
    serial: Mutex<()>,
}

impl ActionCapture {
    pub fn new(spool: Arc<SpoolStore>, dedupe: Arc<DedupeStore>, hasher: Arc<dyn EntryHasher>) -> Self {
        ActionCapture {
            spool,
            dedupe,
            hasher,
            serial: Mutex::new(()),
        }
    }

    /// Appends `action` as the next entry and returns it.
    ///
    /// A first-seen action id is also recorded as pending in the dedupe
    /// index. That record is best-effort: the drainer inserts missing ids
    /// itself. An id that is already known keeps its existing record, so a
    /// repeated action that was already emitted is never emitted again.
    ///
    /// The entry is not durable until the spool is committed.
    pub fn capture(&self, action: Action) -> Result<SpoolEntry> {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = chain_entry(
            self.hasher.as_ref(),
            self.spool.sequence() + 1,
            self.spool.head_digest(),
            action,
        )?;
        self.spool.append(&entry)?;

        let action_id = entry.action_id();
        if self.dedupe.has(action_id) {
            debug!(action_id = %action_id, sequence = entry.sequence, "Action id already indexed");
        } else if let Err(e) = self
            .dedupe
            .set(action_id, DedupeEntry::pending(entry.sequence))
        {
            warn!(
                action_id = %action_id,
                sequence = entry.sequence,
                error = %e,
                "Failed to index captured action"
            );
        }

        Ok(entry)
    }
}
