//! The beat-check liveness sweep (§4.F).

use std::sync::Arc;

use naming_types::{DatumValue, Instance, Key};
use tracing::warn;

use crate::registry::EphemeralRegistry;

/// Notified whenever an instance flips from healthy to unhealthy due to a
/// missed heartbeat. Optional: most embeddings only care about the
/// resulting `ServiceInfo` push, which already happens via the distro put.
pub trait BeatCheckEventSink: Send + Sync {
    fn on_heartbeat_timeout(&self, key: &Key, instance: &Instance);
}

/// Runs the periodic liveness sweep for every service this node owns.
pub struct BeatCheckTask {
    registry: Arc<EphemeralRegistry>,
    health_check_enabled: bool,
    expire_instance: bool,
    event_sink: Option<Arc<dyn BeatCheckEventSink>>,
}

impl BeatCheckTask {
    pub fn new(registry: Arc<EphemeralRegistry>, health_check_enabled: bool, expire_instance: bool) -> Self {
        Self {
            registry,
            health_check_enabled,
            expire_instance,
            event_sink: None,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn BeatCheckEventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// One sweep over every service this node currently holds a container
    /// for, skipping any it is not responsible for.
    pub async fn sweep_all(&self, now_millis: u64) {
        if !self.health_check_enabled {
            return;
        }
        for key in self.registry.keys() {
            self.sweep_one(&key, now_millis).await;
        }
    }

    async fn sweep_one(&self, key: &Key, now_millis: u64) {
        if !self.registry.mapper().responsible(&key.grouped_service_name()) {
            return;
        }
        let Some(service) = self.registry.snapshot(key) else {
            return;
        };
        let instances = service.all_instances();

        let mut flipped = false;
        for instance in &instances {
            if instance.is_heartbeat_timed_out(now_millis) && !instance.marked && instance.healthy {
                self.registry.mutate_service(key, |svc| {
                    if let Some(bucket) = svc.clusters.get_mut(&instance.cluster_name) {
                        if let Some(target) = bucket
                            .iter_mut()
                            .find(|i| i.ip == instance.ip && i.port == instance.port)
                        {
                            target.healthy = false;
                        }
                    }
                    svc.recompute_checksum(now_millis);
                });
                flipped = true;
                if let Some(sink) = &self.event_sink {
                    sink.on_heartbeat_timeout(key, instance);
                }
            }
        }

        if flipped {
            if let Some(updated) = self.registry.snapshot(key) {
                self.registry
                    .protocol()
                    .put(key.clone(), DatumValue::InstanceList(updated.all_instances()));
            }
        }

        if !self.expire_instance {
            return;
        }

        let to_delete: Vec<Instance> = instances
            .into_iter()
            .filter(|instance| instance.is_delete_timed_out(now_millis) && !instance.marked)
            .collect();

        for instance in to_delete {
            let registry = self.registry.clone();
            let namespace_id = key.namespace_id().clone();
            let group = key.group().clone();
            let service_name = key.service().clone();
            let cluster = instance.cluster_name.clone();
            let ip = instance.ip.clone();
            let port = instance.port;
            tokio::spawn(async move {
                if let Err(err) =
                    registry.deregister_instance(namespace_id, group, service_name, cluster, &ip, port, now_millis)
                {
                    warn!(%err, ip, port, "beat-check delete failed, next sweep will retry");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naming_distro::DistroProtocol;
    use naming_store::{DataStore, Notifier};
    use naming_types::{ClusterName, GroupName, NamespaceId, ServiceName};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

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

    fn registry() -> Arc<EphemeralRegistry> {
        let mapper = Arc::new(naming_distro::DistroMapper::new("a", vec!["a".to_string()]));
        let protocol = Arc::new(DistroProtocol::new(
            mapper.clone(),
            Arc::new(DataStore::new()),
            Arc::new(Notifier::new(64)),
            Arc::new(NullTransport),
            true,
        ));
        Arc::new(EphemeralRegistry::new(mapper, protocol))
    }

    struct CountingSink(Arc<AtomicUsize>);
    impl BeatCheckEventSink for CountingSink {
        fn on_heartbeat_timeout(&self, _key: &Key, _instance: &Instance) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn heartbeat_timeout_flips_health_without_delete() {
        let registry = registry();
        let mut instance = Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"));
        instance.heartbeat_timeout_ms = 15_000;
        instance.delete_timeout_ms = 30_000;
        instance.last_beat = 0;
        registry
            .register_instance(
                NamespaceId::new("public"),
                GroupName::new("DEFAULT_GROUP"),
                ServiceName::new("orders"),
                instance,
                0,
            )
            .unwrap();

        let events = Arc::new(AtomicUsize::new(0));
        let task = BeatCheckTask::new(registry.clone(), true, true)
            .with_event_sink(Arc::new(CountingSink(events.clone())));

        task.sweep_all(16_000).await;

        let key = Key::instance_list_ephemeral(
            NamespaceId::new("public"),
            GroupName::new("DEFAULT_GROUP"),
            ServiceName::new("orders"),
        );
        let service = registry.snapshot(&key).unwrap();
        assert!(!service.all_instances()[0].healthy);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_timeout_schedules_async_deregister() {
        let registry = registry();
        let mut instance = Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"));
        instance.healthy = false;
        instance.last_beat = 0;
        registry
            .register_instance(
                NamespaceId::new("public"),
                GroupName::new("DEFAULT_GROUP"),
                ServiceName::new("orders"),
                instance,
                0,
            )
            .unwrap();

        let task = BeatCheckTask::new(registry.clone(), true, true);
        task.sweep_all(31_000).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let key = Key::instance_list_ephemeral(
            NamespaceId::new("public"),
            GroupName::new("DEFAULT_GROUP"),
            ServiceName::new("orders"),
        );
        let service = registry.snapshot(&key).unwrap();
        assert!(service.all_instances().is_empty());
    }
}
