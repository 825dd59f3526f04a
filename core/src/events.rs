//! In-process event fan-out.
//!
//! [`EventCenter`] is a listener registry: callbacks register with
//! [`EventCenter::on`] and every [`EventCenter::emit`] invokes them in
//! registration order with a reference to the event.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle for removing a listener registered with [`EventCenter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A typed listener registry.
///
/// Listeners run synchronously under the registry lock, so a callback must
/// not register or remove listeners on the same center.
pub struct EventCenter<E> {
    /// Registration order is fan-out order.
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> EventCenter<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener; the returned id removes it again via
    /// [`EventCenter::off`].
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .expect("listeners lock")
            .push((id, Box::new(listener)));
        id
    }

    /// Remove one listener. Unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listeners lock")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Invoke every registered listener, in registration order.
    pub fn emit(&self, event: &E) {
        let listeners = self.listeners.lock().expect("listeners lock");
        for (_, listener) in listeners.iter() {
            listener(event);
        }
    }

    /// Remove all listeners.
    pub fn clear(&self) {
        self.listeners.lock().expect("listeners lock").clear();
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listeners lock").len()
    }
}

impl<E> Default for EventCenter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventCenter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCenter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::EventCenter;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SyncEvent {
        Progress(u32),
        Done,
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let center = EventCenter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            center.on(move |event: &SyncEvent| {
                log.lock().expect("log lock").push((name, event.clone()));
            });
        }
        center.emit(&SyncEvent::Progress(50));

        assert_eq!(
            *log.lock().expect("log lock"),
            vec![
                ("first", SyncEvent::Progress(50)),
                ("second", SyncEvent::Progress(50)),
                ("third", SyncEvent::Progress(50)),
            ]
        );
    }

    #[test]
    fn off_removes_only_the_target_listener() {
        let center = EventCenter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let keep = {
            let log = Arc::clone(&log);
            center.on(move |_: &SyncEvent| log.lock().expect("log lock").push("keep"))
        };
        let removed = {
            let log = Arc::clone(&log);
            center.on(move |_: &SyncEvent| log.lock().expect("log lock").push("removed"))
        };

        center.off(removed);
        center.emit(&SyncEvent::Done);

        assert_eq!(*log.lock().expect("log lock"), vec!["keep"]);
        assert_eq!(center.listener_count(), 1);

        center.off(keep);
        assert_eq!(center.listener_count(), 0);
    }

    #[test]
    fn off_with_unknown_id_is_a_no_op() {
        let center: EventCenter<SyncEvent> = EventCenter::new();
        let id = center.on(|_| {});
        center.off(id);
        // Removing the same id twice changes nothing.
        center.off(id);
        assert_eq!(center.listener_count(), 0);
    }

    #[test]
    fn clear_removes_every_listener() {
        let center: EventCenter<SyncEvent> = EventCenter::new();
        center.on(|_| {});
        center.on(|_| {});
        assert_eq!(center.listener_count(), 2);

        center.clear();
        center.emit(&SyncEvent::Done);
        assert_eq!(center.listener_count(), 0);
    }
}
