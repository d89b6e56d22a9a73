//! Reversible delete records
//!
//! A cascading delete produces an [`UndeleteLog`]: an ordered list of
//! type-erased records, one per removal, each owning enough serialized state
//! to fully reconstruct its entity. [`UndeleteLog::undelete_all`] replays the
//! records in reverse removal order, so entities come back before the things
//! that depended on them. A log that is discarded unused must be closed.

use crate::computation::ListEntryRemoved;
use crate::project::Project;
use crate::values::Collection;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// One reversible delete record.
pub trait Undelete: Send + Sync {
    fn undelete(&self, project: &Arc<Project>);
}

/// Ordered, consumable trail of delete records.
pub struct UndeleteLog {
    entries: Mutex<Vec<Box<dyn Undelete>>>,
    consumed: AtomicBool,
}

impl Default for UndeleteLog {
    fn default() -> Self {
        Self::new()
    }
}

impl UndeleteLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn append(&self, entry: Box<dyn Undelete>) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Replay every record in reverse removal order, restoring the deleted
    /// entities. Consumes the log.
    pub fn undelete_all(self, project: &Arc<Project>) {
        self.consumed.store(true, Ordering::SeqCst);
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries.iter().rev() {
            entry.undelete(project);
        }
    }

    /// Discard the log without replaying it.
    pub fn close(self) {
        self.consumed.store(true, Ordering::SeqCst);
        self.entries.lock().clear();
    }
}

impl Drop for UndeleteLog {
    fn drop(&mut self) {
        if !self.consumed.load(Ordering::SeqCst) && !self.entries.lock().is_empty() {
            tracing::warn!("undelete log dropped without undelete_all or close");
        }
    }
}

/// Removal of a non-data-item entity, restored from an in-log snapshot.
pub(crate) struct ItemRemovedRecord {
    pub collection: Collection,
    pub index: usize,
    pub snapshot: JsonValue,
}

impl Undelete for ItemRemovedRecord {
    fn undelete(&self, project: &Arc<Project>) {
        project.undelete_from_snapshot(self.collection, self.index, &self.snapshot);
    }
}

/// Removal of a data item, restored from the storage system's trash.
pub(crate) struct DataItemRemovedRecord {
    pub uuid: Uuid,
    pub index: usize,
}

impl Undelete for DataItemRemovedRecord {
    fn undelete(&self, project: &Arc<Project>) {
        project
            .restore_data_item_at(self.uuid, Some(self.index))
            .expect("data item trash entry missing during undo");
    }
}

/// Removal of one entry from a list-valued variable.
pub(crate) struct ListEntryRemovedRecord {
    pub entry: ListEntryRemoved,
}

impl Undelete for ListEntryRemovedRecord {
    fn undelete(&self, project: &Arc<Project>) {
        let computation = project
            .computation(self.entry.computation_uuid)
            .expect("computation missing while undoing a list entry removal");
        let variable = computation
            .variable_at(self.entry.variable_index)
            .expect("variable index out of range while undoing a list entry removal");
        let objects = variable
            .objects()
            .expect("list entry undo against a non-list variable");
        objects.insert(self.entry.list_index, self.entry.specifier.clone());
    }
}
