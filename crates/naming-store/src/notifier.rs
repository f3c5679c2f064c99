//! Single-consumer change/delete fan-out (§4.D).
//!
//! A bounded task queue holds `(key, action)` pairs. A companion in-queue
//! set deduplicates consecutive `Change` tasks for the same key; `Delete`
//! is never coalesced and, once dispatched, clears the in-queue marker so
//! a `Change` enqueued right behind it is never folded into a stale,
//! already-cleared dedup entry.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crossbeam_queue::ArrayQueue;
use naming_types::{DatumValue, Key};
use tracing::warn;

use crate::data_store::DataStore;
use crate::listener::NamingListener;

/// Default queue capacity, matching the source system's bound.
pub const DEFAULT_CAPACITY: usize = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Change,
    Delete,
}

struct Task {
    key: Key,
    action: Action,
}

/// Drives listener dispatch for a single `DataStore`.
///
/// The "single cooperative worker" described by the source design is
/// modeled here as `dispatch_pending`, intended to be driven by one
/// `tokio::task` in a loop (see `naming-registry`'s dispatcher); the type
/// itself holds no thread of its own so it stays trivially testable.
pub struct Notifier {
    queue: ArrayQueue<Task>,
    in_queue: RwLock<HashSet<Key>>,
    listeners: RwLock<HashMap<Key, Vec<NamingListener>>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            in_queue: RwLock::new(HashSet::new()),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_listener(&self, key: Key, listener: NamingListener) {
        let mut guard = self.listeners.write().expect("listener lock poisoned");
        guard.entry(key).or_default().push(listener);
    }

    pub fn has_listeners(&self, key: &Key) -> bool {
        let guard = self.listeners.read().expect("listener lock poisoned");
        guard.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Enqueues a `Change` task, coalescing consecutive duplicates for the
    /// same key.
    pub fn enqueue_change(&self, key: Key) {
        {
            let mut in_queue = self.in_queue.write().expect("in-queue lock poisoned");
            if !in_queue.insert(key.clone()) {
                return;
            }
        }

        if self
            .queue
            .push(Task {
                key: key.clone(),
                action: Action::Change,
            })
            .is_err()
        {
            let mut in_queue = self.in_queue.write().expect("in-queue lock poisoned");
            in_queue.remove(&key);
            warn!(%key, "notifier queue full, dropping change task");
        }
    }

    /// Enqueues a `Delete` task. Never coalesced.
    pub fn enqueue_delete(&self, key: Key) {
        if self
            .queue
            .push(Task {
                key: key.clone(),
                action: Action::Delete,
            })
            .is_err()
        {
            warn!(%key, "notifier queue full, dropping delete task");
        }
    }

    /// Pops and dispatches up to `max` pending tasks against `store`,
    /// returning the number dispatched.
    pub fn dispatch_pending(&self, store: &DataStore, max: usize) -> usize {
        let mut dispatched = 0;
        for _ in 0..max {
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.dispatch_one(store, task);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch_one(&self, store: &DataStore, task: Task) {
        {
            let mut in_queue = self.in_queue.write().expect("in-queue lock poisoned");
            in_queue.remove(&task.key);
        }
        self.notify_listeners(store, &task.key, task.action);
    }

    /// Delivers an action to a key's listeners directly, in the caller's
    /// thread, bypassing the task queue. Used by the bulk snapshot install
    /// path (§4.E), which must notify inline rather than defer to the
    /// single-consumer dispatcher.
    pub fn notify_now(&self, store: &DataStore, key: &Key, action: Action) {
        self.notify_listeners(store, key, action);
    }

    fn notify_listeners(&self, store: &DataStore, key: &Key, action: Action) {
        let guard = self.listeners.read().expect("listener lock poisoned");
        let Some(listeners) = guard.get(key) else {
            warn!(%key, "no listeners registered for key, dropping notification");
            return;
        };
        if listeners.is_empty() {
            warn!(%key, "no listeners registered for key, dropping notification");
            return;
        }

        match action {
            Action::Delete => {
                for listener in listeners {
                    listener.on_delete(key);
                }
            }
            Action::Change => {
                let Some(datum) = store.get(key) else {
                    warn!(%key, "change task dispatched for key missing from store");
                    return;
                };
                for listener in listeners {
                    match (listener, &datum.value) {
                        (NamingListener::InstanceList(l), DatumValue::InstanceList(instances)) => {
                            l.on_change(key, instances);
                        }
                        (NamingListener::ServiceMeta(l), DatumValue::ServiceMeta(meta)) => {
                            l.on_change(key, meta);
                        }
                        _ => warn!(%key, "listener kind mismatch for key, skipping"),
                    }
                }
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naming_types::{ClusterName, Datum, GroupName, Instance, NamespaceId, ServiceName};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn key() -> Key {
        Key::instance_list_ephemeral(
            NamespaceId::new("public"),
            GroupName::new("DEFAULT_GROUP"),
            ServiceName::new("orders"),
        )
    }

    struct CountingListener {
        changes: Arc<AtomicUsize>,
        deletes: Arc<AtomicUsize>,
    }

    impl crate::listener::InstanceListListener for CountingListener {
        fn on_change(&self, _key: &Key, _instances: &[Instance]) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_delete(&self, _key: &Key) {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn consecutive_changes_coalesce() {
        let notifier = Notifier::new(16);
        let store = DataStore::new();
        let instances = vec![Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"))];
        store.put(Datum::new(
            key(),
            naming_types::DatumValue::InstanceList(instances),
            1,
        ));

        let changes = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));
        notifier.register_listener(
            key(),
            NamingListener::InstanceList(Box::new(CountingListener {
                changes: changes.clone(),
                deletes: deletes.clone(),
            })),
        );

        for _ in 0..5 {
            notifier.enqueue_change(key());
        }
        assert_eq!(notifier.pending_len(), 1);

        let dispatched = notifier.dispatch_pending(&store, 10);
        assert_eq!(dispatched, 1);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn change_then_delete_then_change_does_not_coalesce() {
        let notifier = Notifier::new(16);
        let store = DataStore::new();
        let instances = vec![Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"))];
        store.put(Datum::new(
            key(),
            naming_types::DatumValue::InstanceList(instances),
            1,
        ));

        let changes = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));
        notifier.register_listener(
            key(),
            NamingListener::InstanceList(Box::new(CountingListener {
                changes: changes.clone(),
                deletes: deletes.clone(),
            })),
        );

        notifier.enqueue_change(key());
        notifier.enqueue_delete(key());
        notifier.dispatch_pending(&store, 10);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);

        notifier.enqueue_change(key());
        assert_eq!(notifier.pending_len(), 1);
        notifier.dispatch_pending(&store, 10);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispatch_without_listeners_is_a_noop() {
        let notifier = Notifier::new(16);
        let store = DataStore::new();
        notifier.enqueue_change(key());
        let dispatched = notifier.dispatch_pending(&store, 10);
        assert_eq!(dispatched, 1);
    }

    proptest::proptest! {
        #[test]
        fn burst_of_changes_delivers_between_one_and_n_callbacks(burst in 1usize..200) {
            let notifier = Notifier::new(1_048_576);
            let store = DataStore::new();
            store.put(Datum::new(
                key(),
                naming_types::DatumValue::InstanceList(vec![Instance::new(
                    "10.0.0.1",
                    8080,
                    ClusterName::new("DEFAULT"),
                )]),
                1,
            ));

            let changes = Arc::new(AtomicUsize::new(0));
            let deletes = Arc::new(AtomicUsize::new(0));
            notifier.register_listener(
                key(),
                NamingListener::InstanceList(Box::new(CountingListener {
                    changes: changes.clone(),
                    deletes: deletes.clone(),
                })),
            );

            for _ in 0..burst {
                notifier.enqueue_change(key());
            }
            notifier.dispatch_pending(&store, burst);

            let observed = changes.load(Ordering::SeqCst);
            proptest::prop_assert!(observed >= 1 && observed <= burst);
        }

        #[test]
        fn change_followed_by_delete_always_ends_on_delete(leading_changes in 1usize..50) {
            let notifier = Notifier::new(1_048_576);
            let store = DataStore::new();
            store.put(Datum::new(
                key(),
                naming_types::DatumValue::InstanceList(vec![Instance::new(
                    "10.0.0.1",
                    8080,
                    ClusterName::new("DEFAULT"),
                )]),
                1,
            ));

            let order = Arc::new(Mutex::new(Vec::new()));
            struct OrderListener(Arc<Mutex<Vec<&'static str>>>);
            impl crate::listener::InstanceListListener for OrderListener {
                fn on_change(&self, _key: &Key, _instances: &[Instance]) {
                    self.0.lock().unwrap().push("change");
                }
                fn on_delete(&self, _key: &Key) {
                    self.0.lock().unwrap().push("delete");
                }
            }
            notifier.register_listener(
                key(),
                NamingListener::InstanceList(Box::new(OrderListener(order.clone()))),
            );

            for _ in 0..leading_changes {
                notifier.enqueue_change(key());
            }
            notifier.enqueue_delete(key());
            notifier.dispatch_pending(&store, leading_changes + 1);

            let recorded = order.lock().unwrap();
            proptest::prop_assert_eq!(recorded.last().copied(), Some("delete"));
        }
    }
}
