//! Multicast change notification
//!
//! An [`Event`] fans a fired value out to every live listener. Listeners are
//! detached by closing (or dropping) the [`EventListener`] returned from
//! [`Event::listen`]; a listener that outlives its event simply becomes inert.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    callback: Callback<T>,
}

/// Multicast notification carrying values of type `T`.
///
/// Cloning an `Event` produces another handle to the same listener set, so a
/// closure can capture a clone and re-fire the original event.
///
/// # Reentrancy
/// `fire` snapshots the listener list before invoking callbacks, so a
/// callback may listen, close listeners, or fire the same event without
/// deadlocking.
pub struct Event<T> {
    entries: Arc<Mutex<Vec<Entry<T>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T: 'static> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T: 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<T: 'static> Event<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a listener. The listener stays attached until the returned
    /// [`EventListener`] is closed or dropped.
    pub fn listen(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> EventListener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            callback: Arc::new(callback),
        });
        let weak: Weak<Mutex<Vec<Entry<T>>>> = Arc::downgrade(&self.entries);
        EventListener::new(move || {
            if let Some(entries) = weak.upgrade() {
                entries.lock().retain(|entry| entry.id != id);
            }
        })
    }

    /// Fire the event, delivering `value` to every listener attached at the
    /// moment of the call.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Handle keeping a listener attached to an [`Event`].
///
/// Closing is idempotent; dropping an unclosed listener detaches it as well.
pub struct EventListener {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl EventListener {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// Detach the listener from its event.
    pub fn close(&self) {
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listener_receives_fired_value() {
        let event: Event<u32> = Event::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let _listener = event.listen(move |value| {
            seen_clone.fetch_add(*value as usize, Ordering::SeqCst);
        });
        event.fire(&3);
        event.fire(&4);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn closed_listener_stops_receiving() {
        let event: Event<()> = Event::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let listener = event.listen(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        event.fire(&());
        listener.close();
        event.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn drop_detaches_listener() {
        let event: Event<()> = Event::new();
        {
            let _listener = event.listen(|_| {});
            assert_eq!(event.listener_count(), 1);
        }
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let event: Event<()> = Event::new();
        let listener = event.listen(|_| {});
        listener.close();
        listener.close();
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn clone_shares_listener_set() {
        let event: Event<()> = Event::new();
        let clone = event.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _listener = event.listen(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        clone.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_detach_during_fire() {
        let event: Event<()> = Event::new();
        let slot: Arc<Mutex<Option<EventListener>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let listener = event.listen(move |_| {
            if let Some(listener) = slot_clone.lock().take() {
                listener.close();
            }
        });
        *slot.lock() = Some(listener);
        event.fire(&());
        assert_eq!(event.listener_count(), 0);
    }
}
