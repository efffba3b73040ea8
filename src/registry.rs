//! Listener registry and connection-status broadcast primitives.
//!
//! Fan-out is synchronous and fault isolated per callback: a panicking
//! subscriber is caught and logged, and never prevents delivery to the
//! remaining subscribers or propagates to the emitter.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::warn;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Opaque handle identifying one listener registration.
///
/// Every call to `on`/`subscribe` yields a fresh id, so registering the same
/// closure twice produces two independent registrations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

/// Coarse connection state delivered to status subscribers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Ordered per-event-name callback registry.
///
/// Callbacks for a name run in registration order. No dedup is performed;
/// removal detaches exactly one registration.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventCallback)>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `event_name` and returns its handle.
    pub fn on<F>(&self, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = next_listener_id();
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes the registration identified by `id` under `event_name`.
    ///
    /// Returns `false` when no such registration exists.
    pub fn off(&self, event_name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = listeners.get_mut(event_name) else {
            return false;
        };
        let Some(position) = entries.iter().position(|(entry_id, _)| *entry_id == id) else {
            return false;
        };
        entries.remove(position);
        if entries.is_empty() {
            listeners.remove(event_name);
        }
        true
    }

    /// Invokes every callback registered for `event_name`, in registration
    /// order.
    ///
    /// Callbacks are snapshotted before invocation so a listener may call
    /// [`on`](Self::on)/[`off`](Self::off) reentrantly without deadlocking.
    pub fn emit(&self, event_name: &str, data: &Value) {
        let callbacks: Vec<EventCallback> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            match listeners.get(event_name) {
                Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                warn!(event = "listener_panicked", event_name, "listener panicked during fan-out");
            }
        }
    }

    /// Number of live registrations for `event_name`.
    pub fn listener_count(&self, event_name: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.get(event_name).map_or(0, Vec::len)
    }
}

/// Ordered set of coarse connection-status subscribers.
///
/// Independent of [`ListenerRegistry`]: subscribers receive only the
/// two-valued status signal, never event payloads.
#[derive(Default)]
pub struct ConnectionListenerSet {
    listeners: Mutex<Vec<(ListenerId, StatusCallback)>>,
}

impl ConnectionListenerSet {
    /// Creates an empty subscriber set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a status subscriber and returns its handle.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = next_listener_id();
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.push((id, Arc::new(callback)));
        id
    }

    /// Removes the subscriber identified by `id`.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = listeners.iter().position(|(entry_id, _)| *entry_id == id) else {
            return false;
        };
        listeners.remove(position);
        true
    }

    /// Delivers `status` to every subscriber with the same ordering and fault
    /// isolation as [`ListenerRegistry::emit`].
    pub fn notify(&self, status: ConnectionStatus) {
        let callbacks: Vec<StatusCallback> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                warn!(event = "status_listener_panicked", "status listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{ConnectionListenerSet, ConnectionStatus, ListenerRegistry};

    #[test]
    fn emit_invokes_listeners_in_registration_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.on("notification", move |_| {
                seen.lock().expect("lock").push(label);
            });
        }

        registry.emit("notification", &json!({"n": 1}));
        assert_eq!(*seen.lock().expect("lock"), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_registration_fires_twice_and_single_removal_leaves_one() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make_listener = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move |_: &serde_json::Value| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = registry.on("notification", make_listener(&calls));
        let _second = registry.on("notification", make_listener(&calls));

        registry.emit("notification", &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(registry.off("notification", first));
        registry.emit("notification", &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.listener_count("notification"), 1);
    }

    #[test]
    fn off_unknown_listener_is_a_no_op() {
        let registry = ListenerRegistry::new();
        let id = registry.on("notification", |_| {});
        assert!(!registry.off("session_update", id));
        assert!(registry.off("notification", id));
        assert!(!registry.off("notification", id));
    }

    #[test]
    fn panicking_listener_does_not_block_later_listeners() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.on("notification", |_| panic!("listener bug"));
        {
            let calls = Arc::clone(&calls);
            registry.on("notification", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.emit("notification", &json!({}));
        registry.emit("notification", &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_for_unknown_event_is_a_no_op() {
        let registry = ListenerRegistry::new();
        registry.emit("vote_update", &json!({}));
        assert_eq!(registry.listener_count("vote_update"), 0);
    }

    #[test]
    fn listener_may_remove_itself_during_emit() {
        let registry = Arc::new(ListenerRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let id_slot = Arc::new(Mutex::new(None));
        let id = {
            let registry_in_closure = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            let id_slot = Arc::clone(&id_slot);
            registry.on("notification", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *id_slot.lock().expect("lock") {
                    registry_in_closure.off("notification", id);
                }
            })
        };
        *id_slot.lock().expect("lock") = Some(id);

        registry.emit("notification", &json!({}));
        registry.emit("notification", &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_set_delivers_both_values_and_isolates_panics() {
        let set = ConnectionListenerSet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        set.subscribe(|_| panic!("status listener bug"));
        {
            let seen = Arc::clone(&seen);
            set.subscribe(move |status| {
                seen.lock().expect("lock").push(status);
            });
        }

        set.notify(ConnectionStatus::Connected);
        set.notify(ConnectionStatus::Disconnected);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn unsubscribe_removes_exactly_one_subscriber() {
        let set = ConnectionListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make_subscriber = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = set.subscribe(make_subscriber(&calls));
        let _second = set.subscribe(make_subscriber(&calls));

        assert!(set.unsubscribe(first));
        assert!(!set.unsubscribe(first));

        set.notify(ConnectionStatus::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
