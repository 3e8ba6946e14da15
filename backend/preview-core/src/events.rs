//! Observer registration with explicit unsubscribe tokens.
//!
//! The supervisor raises notifications (error changed, preview data
//! received, process exited) to whoever registered a handler. Handlers run
//! on the task that raises the event - callers needing a particular thread
//! must redispatch themselves. Unsubscribing is the caller's job: a token
//! that is never redeemed keeps its handler registered, including across
//! dispose of the publisher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type HandlerList<E> = Arc<Mutex<Vec<(u64, Handler<E>)>>>;

/// A registry of event handlers for one event type.
pub struct EventRegistry<E> {
    next_id: AtomicU64,
    handlers: HandlerList<E>,
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a handler; the returned token unsubscribes it.
    pub fn subscribe<F>(&self, handler: F) -> EventSubscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .expect("event handler list poisoned")
            .push((id, Arc::new(handler)));

        EventSubscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Invoke every registered handler with `event`.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe reentrantly without deadlocking.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .expect("event handler list poisoned")
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            handler(event);
        }
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Token returned by [`EventRegistry::subscribe`].
///
/// Dropping the token does NOT unsubscribe; call [`unsubscribe`] when the
/// handler must stop being invoked.
///
/// [`unsubscribe`]: EventSubscription::unsubscribe
pub struct EventSubscription<E> {
    id: u64,
    handlers: Weak<Mutex<Vec<(u64, Handler<E>)>>>,
}

impl<E> EventSubscription<E> {
    /// Remove the handler this token was issued for. Safe to call after
    /// the registry itself is gone.
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers
                .lock()
                .expect("event handler list poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}
