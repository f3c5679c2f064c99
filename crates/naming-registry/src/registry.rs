//! Ephemeral instance lifecycle: register, deregister, beat.
//!
//! This crate is the only thing permitted to mutate a [`Service`]; all
//! mutations that change the instance set are replicated by routing
//! through [`DistroProtocol::put`], so owners and listeners stay
//! consistent (see the beat-check task's delete path for why this
//! indirection matters).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use naming_distro::{DistroMapper, DistroProtocol};
use naming_types::{ClusterName, DatumValue, GroupName, Instance, Key, NamespaceId, Service, ServiceName};
use tracing::info;

use crate::error::RegistryError;

/// Owns the authoritative `Service` containers for every ephemeral key this
/// node is responsible for, and routes every mutation through the distro
/// protocol.
pub struct EphemeralRegistry {
    mapper: Arc<DistroMapper>,
    protocol: Arc<DistroProtocol>,
    services: Arc<RwLock<HashMap<Key, Service>>>,
}

impl EphemeralRegistry {
    pub fn new(mapper: Arc<DistroMapper>, protocol: Arc<DistroProtocol>) -> Self {
        Self {
            mapper,
            protocol,
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// An adapter implementing [`naming_distro::DefaultServiceHook`] over
    /// this registry's service map, so a bulk snapshot install can
    /// synthesize a container without `naming-distro` depending on this
    /// crate (see `DESIGN.md`).
    pub fn default_service_hook(&self) -> Arc<dyn naming_distro::DefaultServiceHook> {
        Arc::new(RegistryServiceHook {
            services: self.services.clone(),
        })
    }

    fn require_ownership(&self, key: &Key) -> Result<(), RegistryError> {
        if self.mapper.responsible(&key.grouped_service_name()) {
            Ok(())
        } else {
            Err(RegistryError::NotOwner {
                service: key.grouped_service_name(),
            })
        }
    }

    pub fn register_instance(
        &self,
        namespace_id: NamespaceId,
        group: GroupName,
        service_name: ServiceName,
        instance: Instance,
        now_millis: u64,
    ) -> Result<(), RegistryError> {
        let key = Key::instance_list_ephemeral(namespace_id.clone(), group.clone(), service_name.clone());
        self.require_ownership(&key)?;

        let instances = {
            let mut services = self.services.write().expect("services lock poisoned");
            let service = services
                .entry(key.clone())
                .or_insert_with(|| Service::new(namespace_id, group, service_name, now_millis));
            service.upsert_instance(instance, now_millis);
            service.all_instances()
        };

        self.protocol.put(key, DatumValue::InstanceList(instances));
        Ok(())
    }

    pub fn deregister_instance(
        &self,
        namespace_id: NamespaceId,
        group: GroupName,
        service_name: ServiceName,
        cluster: ClusterName,
        ip: &str,
        port: u16,
        now_millis: u64,
    ) -> Result<(), RegistryError> {
        let key = Key::instance_list_ephemeral(namespace_id, group, service_name);
        self.require_ownership(&key)?;

        let instances = {
            let mut services = self.services.write().expect("services lock poisoned");
            let Some(service) = services.get_mut(&key) else {
                return Err(RegistryError::InstanceNotFound {
                    service: key.grouped_service_name(),
                    ip: ip.to_string(),
                    port,
                });
            };
            if !service.remove_instance(&cluster, ip, port, now_millis) {
                return Err(RegistryError::InstanceNotFound {
                    service: key.grouped_service_name(),
                    ip: ip.to_string(),
                    port,
                });
            }
            service.all_instances()
        };

        self.protocol.put(key, DatumValue::InstanceList(instances));
        Ok(())
    }

    /// Records a liveness beat. Local-only: it does not trigger a distro
    /// re-sync by itself, matching the source system's treatment of beats
    /// as cheap and high-frequency. A health-state flip away from this
    /// path (see the beat-check task) always re-syncs.
    pub fn record_beat(
        &self,
        key: &Key,
        ip: &str,
        port: u16,
        cluster: &ClusterName,
        now_millis: u64,
    ) -> Result<(), RegistryError> {
        let mut services = self.services.write().expect("services lock poisoned");
        let Some(service) = services.get_mut(key) else {
            return Err(RegistryError::InstanceNotFound {
                service: key.grouped_service_name(),
                ip: ip.to_string(),
                port,
            });
        };
        let Some(bucket) = service.clusters.get_mut(cluster) else {
            return Err(RegistryError::InstanceNotFound {
                service: key.grouped_service_name(),
                ip: ip.to_string(),
                port,
            });
        };
        let Some(instance) = bucket.iter_mut().find(|i| i.ip == ip && i.port == port) else {
            return Err(RegistryError::InstanceNotFound {
                service: key.grouped_service_name(),
                ip: ip.to_string(),
                port,
            });
        };

        instance.record_beat(now_millis);
        if !instance.healthy {
            instance.healthy = true;
            info!(%key, ip, port, "instance recovered health via beat");
            let instances = service.all_instances();
            drop(services);
            self.protocol.put(key.clone(), DatumValue::InstanceList(instances));
        }
        Ok(())
    }

    /// A point-in-time clone of the service behind `key`, if this node
    /// currently holds one.
    pub fn snapshot(&self, key: &Key) -> Option<Service> {
        let guard = self.services.read().expect("services lock poisoned");
        guard.get(key).cloned()
    }

    pub fn mapper(&self) -> &Arc<DistroMapper> {
        &self.mapper
    }

    pub fn protocol(&self) -> &Arc<DistroProtocol> {
        &self.protocol
    }

    /// All keys this registry currently holds a `Service` container for.
    pub fn keys(&self) -> Vec<Key> {
        let guard = self.services.read().expect("services lock poisoned");
        guard.keys().cloned().collect()
    }

    pub(crate) fn mutate_service<R>(&self, key: &Key, f: impl FnOnce(&mut Service) -> R) -> Option<R> {
        let mut guard = self.services.write().expect("services lock poisoned");
        guard.get_mut(key).map(f)
    }
}

struct RegistryServiceHook {
    services: Arc<RwLock<HashMap<Key, Service>>>,
}

impl naming_distro::DefaultServiceHook for RegistryServiceHook {
    fn ensure_service(&self, key: &Key) -> bool {
        let mut guard = self.services.write().expect("services lock poisoned");
        if !guard.contains_key(key) {
            let now_millis = now_millis();
            let service = Service::new(key.namespace_id().clone(), key.group().clone(), key.service().clone(), now_millis);
            guard.insert(key.clone(), service);
        }
        true
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use naming_distro::DistroProtocol;
    use naming_store::{DataStore, Notifier};
    use std::sync::Arc;

    fn mapper() -> Arc<DistroMapper> {
        Arc::new(DistroMapper::new("a", vec!["a".to_string()]))
    }

    struct NullTransport;
    #[async_trait::async_trait]
    impl naming_distro::Transport for NullTransport {
        async fn sync_all(
            &self,
            _peer: &str,
            _operation: naming_distro::DataOperation,
            _payload: naming_distro::SyncPayload,
        ) -> Result<(), naming_distro::DistroError> {
            Ok(())
        }
        async fn verify(
            &self,
            _peer: &str,
            _checksums: HashMap<Key, naming_types::Checksum>,
        ) -> Result<(), naming_distro::DistroError> {
            Ok(())
        }
        async fn pull(
            &self,
            _peer: &str,
            _keys: Vec<Key>,
        ) -> Result<HashMap<Key, naming_types::Datum>, naming_distro::DistroError> {
            Ok(HashMap::new())
        }
    }

    fn registry() -> EphemeralRegistry {
        let mapper = mapper();
        let protocol = Arc::new(DistroProtocol::new(
            mapper.clone(),
            Arc::new(DataStore::new()),
            Arc::new(Notifier::new(64)),
            Arc::new(NullTransport),
            true,
        ));
        EphemeralRegistry::new(mapper, protocol)
    }

    #[test]
    fn register_then_deregister_round_trips() {
        let registry = registry();
        let instance = Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"));
        registry
            .register_instance(
                NamespaceId::new("public"),
                GroupName::new("DEFAULT_GROUP"),
                ServiceName::new("orders"),
                instance,
                0,
            )
            .unwrap();

        let key = Key::instance_list_ephemeral(
            NamespaceId::new("public"),
            GroupName::new("DEFAULT_GROUP"),
            ServiceName::new("orders"),
        );
        assert_eq!(registry.snapshot(&key).unwrap().all_instances().len(), 1);

        registry
            .deregister_instance(
                NamespaceId::new("public"),
                GroupName::new("DEFAULT_GROUP"),
                ServiceName::new("orders"),
                ClusterName::new("DEFAULT"),
                "10.0.0.1",
                8080,
                1,
            )
            .unwrap();
        assert!(registry.snapshot(&key).unwrap().all_instances().is_empty());
    }

    #[test]
    fn non_owner_rejects_mutation() {
        let mapper = Arc::new(DistroMapper::new("b", vec!["a".to_string(), "b".to_string()]));
        let protocol = Arc::new(DistroProtocol::new(
            mapper.clone(),
            Arc::new(DataStore::new()),
            Arc::new(Notifier::new(64)),
            Arc::new(NullTransport),
            true,
        ));
        let registry = EphemeralRegistry::new(mapper.clone(), protocol);

        // Find a service name this mapper does NOT assign to "b".
        let mut not_owned = None;
        for i in 0..100 {
            let candidate = format!("svc-{i}");
            if mapper.map_srv(&format!("DEFAULT_GROUP@@{candidate}")) != Some("b".to_string()) {
                not_owned = Some(candidate);
                break;
            }
        }
        let service_name = not_owned.expect("expected at least one non-owned service name");

        let result = registry.register_instance(
            NamespaceId::new("public"),
            GroupName::new("DEFAULT_GROUP"),
            ServiceName::new(service_name),
            Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT")),
            0,
        );
        assert!(matches!(result, Err(RegistryError::NotOwner { .. })));
    }
}
