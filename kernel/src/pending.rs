//! Thread-safe hand-off for background change marks
//!
//! Background producers (an acquisition process, a worker thread finishing a
//! long evaluation) never touch graph structure directly; they mark items
//! changed here. The single mutator drains the queue before any evaluation
//! proceeds, so change notifications are never delivered while the graph is
//! partially bound.
//!
//! The queue is bounded and keyed by UUID, so re-marking is idempotent. When
//! the bound is exceeded the queue records an overflow instead of growing;
//! the drainer then treats everything as changed.

use indexmap::IndexSet;
use parking_lot::Mutex;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct ChangedState {
    changed: IndexSet<Uuid>,
    overflowed: bool,
}

/// Result of one drain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedBatch {
    pub uuids: Vec<Uuid>,
    /// The bound was exceeded since the last drain; callers must assume any
    /// item may have changed.
    pub overflowed: bool,
}

/// Bounded, mutex-guarded pending-change set.
#[derive(Debug)]
pub struct ChangedQueue {
    state: Mutex<ChangedState>,
    capacity: usize,
}

impl Default for ChangedQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ChangedQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "changed queue requires a non-zero capacity");
        Self {
            state: Mutex::new(ChangedState::default()),
            capacity,
        }
    }

    /// Mark an item changed. Callable from any thread.
    pub fn mark(&self, uuid: Uuid) {
        let mut state = self.state.lock();
        if state.changed.contains(&uuid) {
            return;
        }
        if state.changed.len() >= self.capacity {
            if !state.overflowed {
                tracing::warn!(capacity = self.capacity, "changed queue overflow, coalescing");
            }
            state.overflowed = true;
            return;
        }
        state.changed.insert(uuid);
    }

    /// Take everything marked so far, in marking order. Single-mutator side.
    pub fn drain(&self) -> ChangedBatch {
        let mut state = self.state.lock();
        let uuids = state.changed.drain(..).collect();
        let overflowed = std::mem::take(&mut state.overflowed);
        ChangedBatch { uuids, overflowed }
    }

    pub fn len(&self) -> usize {
        self.state.lock().changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().changed.is_empty()
    }
}
