//! Ordered list with insert/remove notifications
//!
//! The observable collection backing list-valued computation inputs: callers
//! mutate the list, listeners learn about each structural change with its
//! index so they can stay in lockstep.

use crate::event::Event;
use parking_lot::RwLock;

/// Ordered list firing an event for every insertion and removal.
#[derive(Debug)]
pub struct ObservableList<T: Clone + Send + Sync + 'static> {
    items: RwLock<Vec<T>>,
    pub item_inserted_event: Event<(usize, T)>,
    pub item_removed_event: Event<(usize, T)>,
}

impl<T: Clone + Send + Sync + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableList<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            item_inserted_event: Event::new(),
            item_removed_event: Event::new(),
        }
    }

    pub fn from_items(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
            item_inserted_event: Event::new(),
            item_removed_event: Event::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Snapshot of the current items.
    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    /// Insert at `index`, notifying listeners after the list is updated.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn insert(&self, index: usize, item: T) {
        self.items.write().insert(index, item.clone());
        self.item_inserted_event.fire(&(index, item));
    }

    pub fn push(&self, item: T) {
        let index = self.items.read().len();
        self.insert(index, item);
    }

    /// Remove the item at `index`, notifying listeners after removal.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn remove(&self, index: usize) -> T {
        let item = self.items.write().remove(index);
        self.item_removed_event.fire(&(index, item.clone()));
        item
    }

    /// Index of the first item matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&T) -> bool) -> Option<usize> {
        self.items.read().iter().position(|item| predicate(item))
    }
}
