//! Concurrent key -> Datum map (§4.C).

use std::collections::HashMap;
use std::sync::RwLock;

use naming_types::{Datum, Key};

/// The authoritative in-memory map from key to replicated datum.
///
/// All operations are atomic per key. `keys()` returns a point-in-time
/// snapshot: callers never observe a torn view of the map even while
/// concurrent `put`/`remove` calls are in flight, since the snapshot is
/// cloned under a single read lock acquisition.
#[derive(Debug, Default)]
pub struct DataStore {
    inner: RwLock<HashMap<Key, Datum>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Installs `datum`, replacing any prior value for its key.
    pub fn put(&self, datum: Datum) {
        let mut guard = self.inner.write().expect("data store lock poisoned");
        guard.insert(datum.key.clone(), datum);
    }

    pub fn get(&self, key: &Key) -> Option<Datum> {
        let guard = self.inner.read().expect("data store lock poisoned");
        guard.get(key).cloned()
    }

    pub fn remove(&self, key: &Key) -> Option<Datum> {
        let mut guard = self.inner.write().expect("data store lock poisoned");
        guard.remove(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        let guard = self.inner.read().expect("data store lock poisoned");
        guard.contains_key(key)
    }

    /// A point-in-time snapshot of every key currently held.
    pub fn keys(&self) -> Vec<Key> {
        let guard = self.inner.read().expect("data store lock poisoned");
        guard.keys().cloned().collect()
    }

    /// A point-in-time snapshot of the whole map, used by the distro
    /// protocol to build verify checksum advertisements.
    pub fn snapshot(&self) -> HashMap<Key, Datum> {
        let guard = self.inner.read().expect("data store lock poisoned");
        guard.clone()
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.read().expect("data store lock poisoned");
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
