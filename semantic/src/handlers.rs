//! Scoped event subscriptions for a shared connection.
//!
//! A connection is multiplexed between long-lived observers (UI state,
//! logging) and short-lived per-query aggregations. Each subscriber is
//! installed on a [`HandlerStack`] and receives a [`Subscription`] guard;
//! dropping the guard uninstalls exactly that subscriber, so whatever path a
//! query takes out of its aggregation, the previous handler set is restored.

use crate::state::ConnectionEvent;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub type EventCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

#[derive(Default)]
struct StackInner {
    next_id: u64,
    entries: Vec<(u64, EventCallback)>
}

#[derive(Clone, Default)]
pub struct HandlerStack {
    inner: Arc<Mutex<StackInner>>
}

impl HandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, callback: EventCallback) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, callback));

        Subscription {
            id,
            stack: Arc::downgrade(&self.inner)
        }
    }

    /// Deliver `event` to every installed callback in installation order.
    ///
    /// The lock is released before any callback runs, so callbacks may install
    /// or drop subscriptions themselves.
    pub fn dispatch(&self, event: &ConnectionEvent) {
        let callbacks: Vec<EventCallback> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard for one installed callback. Uninstalls on drop.
#[must_use = "dropping a Subscription uninstalls its callback immediately"]
pub struct Subscription {
    id: u64,
    stack: Weak<Mutex<StackInner>>
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stack) = self.stack.upgrade() {
            stack.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, EventCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&count);
        let callback: EventCallback = Arc::new(move |_event| {
            clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber() {
        let stack = HandlerStack::new();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        let _a = stack.install(first_cb);
        let _b = stack.install(second_cb);
        stack.dispatch(&ConnectionEvent::StateChanged(ConnectionState::Connected));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_restores_previous_set() {
        let stack = HandlerStack::new();
        let (outer, outer_cb) = counter();
        let (inner, inner_cb) = counter();

        let _outer = stack.install(outer_cb);
        {
            let _inner = stack.install(inner_cb);
            assert_eq!(stack.len(), 2);
            stack.dispatch(&ConnectionEvent::Error("boom".to_string()));
        }
        assert_eq!(stack.len(), 1);

        stack.dispatch(&ConnectionEvent::Error("again".to_string()));
        assert_eq!(outer.load(Ordering::SeqCst), 2);
        assert_eq!(inner.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_order_drop_removes_only_own_entry() {
        let stack = HandlerStack::new();
        let (_, a_cb) = counter();
        let (b, b_cb) = counter();

        let a = stack.install(a_cb);
        let _b = stack.install(b_cb);
        drop(a);

        stack.dispatch(&ConnectionEvent::StateChanged(ConnectionState::Error));
        assert_eq!(stack.len(), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_stack() {
        let stack = HandlerStack::new();
        let (_, cb) = counter();
        let subscription = stack.install(cb);
        drop(stack);
        drop(subscription);
    }

    #[test]
    fn test_callback_may_install_during_dispatch() {
        let stack = HandlerStack::new();
        let nested = stack.clone();
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);

        let _root = stack.install(Arc::new(move |_event| {
            let (_, cb) = counter();
            held_clone.lock().push(nested.install(cb));
        }));

        stack.dispatch(&ConnectionEvent::Error("x".to_string()));
        assert_eq!(stack.len(), 2);
        held.lock().clear();
        assert_eq!(stack.len(), 1);
    }
}
