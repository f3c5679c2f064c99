//! Listener traits and the registration sum type.
//!
//! The source system dispatches to listeners via reflection over the
//! Datum's generic type parameter. That doesn't translate; instead each
//! key family gets its own listener trait, and [`NamingListener`] is a
//! closed sum type selected by [`naming_types::KeyKind`] at registration
//! time.

use naming_types::{Instance, Key, ServiceMetadata};

/// Invoked when a key carrying an instance list changes or is removed.
pub trait InstanceListListener: Send + Sync {
    fn on_change(&self, key: &Key, instances: &[Instance]);
    fn on_delete(&self, key: &Key);
}

/// Invoked when a key carrying service metadata changes or is removed.
pub trait ServiceMetaListener: Send + Sync {
    fn on_change(&self, key: &Key, meta: &ServiceMetadata);
    fn on_delete(&self, key: &Key);
}

/// A registered listener, tagged by the key family it observes.
pub enum NamingListener {
    InstanceList(Box<dyn InstanceListListener>),
    ServiceMeta(Box<dyn ServiceMetaListener>),
}

impl NamingListener {
    pub fn on_delete(&self, key: &Key) {
        match self {
            NamingListener::InstanceList(listener) => listener.on_delete(key),
            NamingListener::ServiceMeta(listener) => listener.on_delete(key),
        }
    }
}
