//! Explicit collaborator wiring for the server composition root.
//!
//! The source system looks up collaborators through a service-locator
//! provided by its hosting framework. That indirection is an artefact of
//! the framework, not the algorithm, so here every collaborator is built
//! once at startup and passed around through this context struct instead.

use std::sync::Arc;

use naming_config::ServerConfig;
use naming_distro::{DistroMapper, DistroProtocol, Transport};
use naming_registry::EphemeralRegistry;
use naming_store::{DataStore, Notifier};

/// Every collaborator the server's scheduled tasks need, built once at
/// startup by [`build`](Self::build).
pub struct ServerContext {
    pub config: ServerConfig,
    pub mapper: Arc<DistroMapper>,
    pub store: Arc<DataStore>,
    pub notifier: Arc<Notifier>,
    pub protocol: Arc<DistroProtocol>,
    pub registry: Arc<EphemeralRegistry>,
}

impl ServerContext {
    pub fn build(
        config: ServerConfig,
        self_id: impl Into<String>,
        peers: Vec<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mapper = Arc::new(DistroMapper::new(self_id, peers));
        let store = Arc::new(DataStore::new());
        let notifier = Arc::new(Notifier::default());
        let protocol = Arc::new(DistroProtocol::new(
            mapper.clone(),
            store.clone(),
            notifier.clone(),
            transport,
            config.default_instance_ephemeral,
        ));
        let registry = Arc::new(EphemeralRegistry::new(mapper.clone(), protocol.clone()));
        protocol.set_default_service_hook(registry.default_service_hook());

        Self {
            config,
            mapper,
            store,
            notifier,
            protocol,
            registry,
        }
    }
}
