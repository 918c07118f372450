//! Minimal synchronous event emitter used by collections and visibility trackers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Synchronous event emitter.
///
/// Listeners are called in the order they were added. The listener list is copied before
/// the event is raised, so listeners may add or remove listeners (or raise other events)
/// without deadlocking. A listener added while an event is being raised is not called for
/// that event.
pub struct EventEmitter<T> {
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: 'static> EventEmitter<T> {
    /// Creates an emitter without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. The listener is removed when the returned handle is dropped.
    pub fn add_listener(
        self: &Arc<Self>,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        let emitter: Weak<Self> = Arc::downgrade(self);
        ListenerHandle {
            remove: Some(Box::new(move || {
                if let Some(emitter) = emitter.upgrade() {
                    emitter.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Calls every listener with the event.
    pub fn raise(&self, event: &T) {
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Keeps a listener registered. Dropping the handle removes the listener.
#[must_use = "the listener is removed as soon as the handle is dropped"]
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    /// Removes the listener. Same as dropping the handle.
    pub fn remove(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("attached", &self.remove.is_some())
            .finish()
    }
}
