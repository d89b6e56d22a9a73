//! Storage with trash semantics
//!
//! The project writes each item's dict here as it changes. Removal moves the
//! dict to a trash area instead of discarding it, so undo can restore the
//! item by UUID ([`StorageSystem::restore_item`]).

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("no stored item for uuid {0}")]
    NotFound(Uuid),
    #[error("no trashed item for uuid {0}")]
    NotInTrash(Uuid),
}

/// Dict-per-item storage keyed by UUID.
pub trait StorageSystem: Send + Sync {
    /// Write (or overwrite) the persisted dict for an item.
    fn write_item(&self, uuid: Uuid, dict: Value);

    /// Read the persisted dict for a live item.
    fn read_item(&self, uuid: Uuid) -> Option<Value>;

    /// Move an item's dict to the trash. Missing items are ignored.
    fn remove_item(&self, uuid: Uuid);

    /// Take an item's dict back out of the trash.
    fn restore_item(&self, uuid: Uuid) -> Result<Value, StorageError>;

    /// Discard everything, live and trashed.
    fn reset(&self);
}

/// In-memory [`StorageSystem`]; the only implementation the model itself
/// needs, and the one the test suites run against.
#[derive(Debug, Default)]
pub struct MemoryStorageSystem {
    live: Mutex<HashMap<Uuid, Value>>,
    trash: Mutex<HashMap<Uuid, Value>>,
}

impl MemoryStorageSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn trash_count(&self) -> usize {
        self.trash.lock().len()
    }
}

impl StorageSystem for MemoryStorageSystem {
    fn write_item(&self, uuid: Uuid, dict: Value) {
        self.live.lock().insert(uuid, dict);
    }

    fn read_item(&self, uuid: Uuid) -> Option<Value> {
        self.live.lock().get(&uuid).cloned()
    }

    fn remove_item(&self, uuid: Uuid) {
        if let Some(dict) = self.live.lock().remove(&uuid) {
            self.trash.lock().insert(uuid, dict);
        }
    }

    fn restore_item(&self, uuid: Uuid) -> Result<Value, StorageError> {
        self.trash
            .lock()
            .remove(&uuid)
            .ok_or(StorageError::NotInTrash(uuid))
    }

    fn reset(&self) {
        self.live.lock().clear();
        self.trash.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_read_round_trips() {
        let storage = MemoryStorageSystem::new();
        let uuid = Uuid::new_v4();
        storage.write_item(uuid, json!({"title": "ring"}));
        assert_eq!(storage.read_item(uuid), Some(json!({"title": "ring"})));
    }

    #[test]
    fn remove_moves_to_trash_and_restore_takes_back() {
        let storage = MemoryStorageSystem::new();
        let uuid = Uuid::new_v4();
        storage.write_item(uuid, json!({"n": 1}));
        storage.remove_item(uuid);
        assert_eq!(storage.read_item(uuid), None);
        assert_eq!(storage.trash_count(), 1);

        let dict = storage.restore_item(uuid).unwrap();
        assert_eq!(dict, json!({"n": 1}));
        assert_eq!(storage.trash_count(), 0);
    }

    #[test]
    fn restore_of_unknown_uuid_is_an_error() {
        let storage = MemoryStorageSystem::new();
        let uuid = Uuid::new_v4();
        assert_eq!(
            storage.restore_item(uuid),
            Err(StorageError::NotInTrash(uuid))
        );
    }

    #[test]
    fn reset_clears_live_and_trash() {
        let storage = MemoryStorageSystem::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        storage.write_item(a, json!(1));
        storage.write_item(b, json!(2));
        storage.remove_item(b);
        storage.reset();
        assert_eq!(storage.live_count(), 0);
        assert_eq!(storage.trash_count(), 0);
    }
}
