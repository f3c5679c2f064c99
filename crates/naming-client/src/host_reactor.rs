//! Host reactor (§4.G): the client-side cache, poller, and event source for
//! subscribed services. The single largest client-side component.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use naming_config::ClientConfig;
use naming_types::{ClusterName, GroupName, Instance, ServiceInfo, ServiceName};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::diff::{diff_instances, InstancesChangeEvent};
use crate::disk_cache;
use crate::error::ClientError;
use crate::failover::FailoverReactor;
use crate::heartbeat::HeartbeatReactor;
use crate::server_query::ServerQueryClient;

const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FAIL_COUNT: u32 = 6;
const MAX_BACKOFF_MS: u64 = 60_000;

pub trait InstancesChangeListener: Send + Sync {
    fn on_change(&self, event: &InstancesChangeEvent);
}

fn cache_key_for(service_name: &str, group_name: &str, clusters: &str) -> String {
    if clusters.is_empty() {
        format!("{group_name}@@{service_name}")
    } else {
        format!("{group_name}@@{service_name}@@{clusters}")
    }
}

struct Watch {
    info: RwLock<HashMap<String, ServiceInfo>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn InstancesChangeListener>>>>,
    updating: Mutex<HashMap<String, Arc<Notify>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    fail_counts: Mutex<HashMap<String, u32>>,
}

impl Watch {
    fn new() -> Self {
        Self {
            info: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            updating: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            fail_counts: Mutex::new(HashMap::new()),
        }
    }
}

/// Maintains a local, continuously refreshed view of every subscribed
/// service: `serviceInfoMap`, the rendezvous map for first-fetch callers,
/// and the per-key scheduled update tasks.
pub struct HostReactor<C: ServerQueryClient + 'static> {
    reactor_id: Uuid,
    client: Arc<C>,
    config: ClientConfig,
    cache_dir: PathBuf,
    local_udp_port: AtomicU16,
    failover: Arc<FailoverReactor>,
    heartbeat: Arc<HeartbeatReactor<C>>,
    watch: Watch,
    cache_millis_default: AtomicU32,
}

impl<C: ServerQueryClient + 'static> HostReactor<C> {
    pub fn new(client: Arc<C>, config: ClientConfig, cache_dir: PathBuf, failover_dir: PathBuf) -> Arc<Self> {
        let heartbeat = Arc::new(HeartbeatReactor::new(client.clone()));
        Arc::new(Self {
            reactor_id: Uuid::new_v4(),
            client,
            config,
            cache_dir,
            local_udp_port: AtomicU16::new(0),
            failover: Arc::new(FailoverReactor::new(failover_dir)),
            heartbeat,
            watch: Watch::new(),
            cache_millis_default: AtomicU32::new(1000),
        })
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatReactor<C>> {
        &self.heartbeat
    }

    pub fn failover(&self) -> &Arc<FailoverReactor> {
        &self.failover
    }

    pub fn set_local_udp_port(&self, port: u16) {
        self.local_udp_port.store(port, Ordering::Relaxed);
    }

    pub fn reactor_id(&self) -> Uuid {
        self.reactor_id
    }

    /// Registers a listener for a service and, if this is the first
    /// listener for the key, performs the initial fetch and starts the
    /// recurring update task.
    pub async fn subscribe(
        self: &Arc<Self>,
        service_name: &str,
        group_name: &str,
        clusters: &str,
        listener: Arc<dyn InstancesChangeListener>,
    ) -> ServiceInfo {
        let key = cache_key_for(service_name, group_name, clusters);
        self.watch
            .listeners
            .write()
            .expect("listeners lock poisoned")
            .entry(key.clone())
            .or_default()
            .push(listener);

        self.get_service_info(service_name, group_name, clusters).await
    }

    /// Drops every listener for a key. If no task remains scheduled, the
    /// cache entry is evicted on the task's next tick.
    pub fn unsubscribe(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = cache_key_for(service_name, group_name, clusters);
        self.watch.listeners.write().expect("listeners lock poisoned").remove(&key);
    }

    fn has_subscribers(&self, key: &str) -> bool {
        self.watch
            .listeners
            .read()
            .expect("listeners lock poisoned")
            .get(key)
            .is_some_and(|v| !v.is_empty())
    }

    /// The primary read path (§4.G `getServiceInfo`).
    pub async fn get_service_info(self: &Arc<Self>, service_name: &str, group_name: &str, clusters: &str) -> ServiceInfo {
        let key = cache_key_for(service_name, group_name, clusters);

        if let Some(snapshot) = self.failover.get(&key) {
            return snapshot;
        }

        if let Some(info) = self.watch.info.read().expect("info lock poisoned").get(&key).cloned() {
            self.schedule_update_if_absent(service_name, group_name, clusters);
            return info;
        }

        let notify = {
            let mut guard = self.watch.updating.lock().expect("updating lock poisoned");
            if let Some(existing) = guard.get(&key) {
                Some(existing.clone())
            } else {
                guard.insert(key.clone(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            let _ = tokio::time::timeout(RENDEZVOUS_TIMEOUT, notify.notified()).await;
            return self
                .watch
                .info
                .read()
                .expect("info lock poisoned")
                .get(&key)
                .cloned()
                .unwrap_or_else(|| ServiceInfo::empty(ServiceName::new(service_name), GroupName::new(group_name), clusters.to_string()));
        }

        let fetched = self.update_service_now(service_name, group_name, clusters).await;

        if let Some(notify) = self.watch.updating.lock().expect("updating lock poisoned").remove(&key) {
            notify.notify_waiters();
        }

        self.schedule_update_if_absent(service_name, group_name, clusters);
        fetched
    }

    /// Synchronously fetches and installs one fresh copy, used both for
    /// first-fetch rendezvous and by the scheduled task.
    async fn update_service_now(&self, service_name: &str, group_name: &str, clusters: &str) -> ServiceInfo {
        let key = cache_key_for(service_name, group_name, clusters);
        let port = self.local_udp_port.load(Ordering::Relaxed);

        match self.client.query_service(service_name, group_name, clusters, port, false).await {
            Ok(fetched) => {
                if fetched.validate() {
                    self.watch.fail_counts.lock().expect("fail counts lock poisoned").remove(&key);
                } else {
                    self.bump_fail_count(&key);
                }
                self.install(key, fetched).await
            }
            Err(err) => {
                warn!(service = service_name, error = %err, "service query failed");
                self.bump_fail_count(&key);
                self.watch
                    .info
                    .read()
                    .expect("info lock poisoned")
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| ServiceInfo::empty(ServiceName::new(service_name), GroupName::new(group_name), clusters.to_string()))
            }
        }
    }

    /// Entry point for push-delivered payloads (§4.H forwards here).
    pub async fn process_service_json(&self, json: &str) -> Result<(), ClientError> {
        let parsed: ServiceInfo = serde_json::from_str(json)?;
        let key = parsed.cache_key();
        self.install(key, parsed).await;
        Ok(())
    }

    async fn install(&self, key: String, new_info: ServiceInfo) -> ServiceInfo {
        let old = self.watch.info.read().expect("info lock poisoned").get(&key).cloned();

        if self.config.push_empty_protection && !new_info.validate() {
            if let Some(old) = old {
                warn!(key = %key, "push-empty-protection kept previous instance list");
                return old;
            }
        }

        if let Some(old) = &old {
            if new_info.last_ref_time != 0 && new_info.last_ref_time < old.last_ref_time {
                warn!(key = %key, "received out-of-date lastRefTime, applying anyway");
            }
        }

        let old_hosts = old.as_ref().map(|o| o.hosts.clone()).unwrap_or_default();
        let diff = diff_instances(&old_hosts, &new_info.hosts);

        if !diff.is_empty() {
            let event = InstancesChangeEvent {
                reactor_id: self.reactor_id,
                service_name: new_info.name.to_string(),
                group_name: new_info.group_name.to_string(),
                clusters: new_info.clusters.clone(),
                hosts: new_info.hosts.clone(),
            };
            self.publish(&key, &event);

            if let Err(err) = disk_cache::write(&self.cache_dir, &new_info) {
                warn!(key = %key, error = %err, "failed to persist service info to disk cache");
            }
        }

        for instance in &diff.modified {
            if instance.ephemeral {
                self.heartbeat.refresh(
                    new_info.name.as_str(),
                    new_info.group_name.as_str(),
                    &instance.ip,
                    instance.port,
                    instance.cluster_name.as_str().to_string(),
                    instance.weight,
                    instance.metadata.clone(),
                );
            }
        }

        self.watch.info.write().expect("info lock poisoned").insert(key, new_info.clone());
        new_info
    }

    fn publish(&self, key: &str, event: &InstancesChangeEvent) {
        let listeners = self.watch.listeners.read().expect("listeners lock poisoned");
        if let Some(list) = listeners.get(key) {
            for listener in list {
                listener.on_change(event);
            }
        }
    }

    fn bump_fail_count(&self, key: &str) -> u32 {
        let mut guard = self.watch.fail_counts.lock().expect("fail counts lock poisoned");
        let count = guard.entry(key.to_string()).or_insert(0);
        *count = (*count + 1).min(MAX_FAIL_COUNT);
        *count
    }

    fn schedule_update_if_absent(self: &Arc<Self>, service_name: &str, group_name: &str, clusters: &str) {
        let key = cache_key_for(service_name, group_name, clusters);
        let mut tasks = self.watch.tasks.lock().expect("tasks lock poisoned");
        if tasks.contains_key(&key) {
            return;
        }

        let reactor = self.clone();
        let service_name = service_name.to_string();
        let group_name = group_name.to_string();
        let clusters = clusters.to_string();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            update_loop(reactor, task_key, service_name, group_name, clusters).await;
        });
        tasks.insert(key, handle);
    }
}

/// The recurring update task: fetch-or-refresh, exponential backoff on an
/// empty result, self-eviction once subscribers are gone (§4.G UpdateTask).
async fn update_loop<C: ServerQueryClient + 'static>(
    reactor: Arc<HostReactor<C>>,
    key: String,
    service_name: String,
    group_name: String,
    clusters: String,
) {
    let mut last_ref_time: u64 = 0;

    loop {
        let cached = reactor.watch.info.read().expect("info lock poisoned").get(&key).cloned();
        let cached_ref_time = cached.as_ref().map(|info| info.last_ref_time).unwrap_or(0);

        if cached_ref_time <= last_ref_time {
            let info = reactor.update_service_now(&service_name, &group_name, &clusters).await;
            last_ref_time = info.last_ref_time;
        } else {
            // The cache already moved past what this task last observed, so
            // a push must have delivered a fresher copy in between ticks.
            // Keep the push session alive instead of clobbering it with a
            // redundant authoritative pull.
            if let Err(err) = reactor.client.refresh_only(&service_name, &group_name, &clusters).await {
                warn!(service = %service_name, error = %err, "refresh-only keep-alive failed");
            }
            last_ref_time = cached_ref_time;
        }

        let fail_count = reactor
            .watch
            .fail_counts
            .lock()
            .expect("fail counts lock poisoned")
            .get(&key)
            .copied()
            .unwrap_or(0);
        let cache_millis = reactor
            .watch
            .info
            .read()
            .expect("info lock poisoned")
            .get(&key)
            .map(|info| info.cache_millis)
            .unwrap_or(0);
        let base_millis = if cache_millis == 0 { 1000 } else { cache_millis };
        let backoff_ms = base_millis.saturating_mul(1u64 << fail_count).min(MAX_BACKOFF_MS);

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

        if !reactor.has_subscribers(&key) {
            reactor.watch.tasks.lock().expect("tasks lock poisoned").remove(&key);
            reactor.watch.info.write().expect("info lock poisoned").remove(&key);
            reactor.watch.fail_counts.lock().expect("fail counts lock poisoned").remove(&key);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::heartbeat::BeatInfo;
    use crate::server_query::BeatResponse;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    struct StubClient {
        calls: AtomicUsize,
        hosts: Mutex<Vec<Instance>>,
    }

    #[async_trait]
    impl ServerQueryClient for StubClient {
        async fn query_service(
            &self,
            service_name: &str,
            group_name: &str,
            clusters: &str,
            _udp_port: u16,
            _healthy_only: bool,
        ) -> Result<ServiceInfo, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut info = ServiceInfo::empty(ServiceName::new(service_name), GroupName::new(group_name), clusters.to_string());
            info.hosts = self.hosts.lock().unwrap().clone();
            info.last_ref_time = self.calls.load(Ordering::SeqCst) as u64;
            Ok(info)
        }

        async fn refresh_only(&self, _service_name: &str, _group_name: &str, _clusters: &str) -> Result<(), ClientError> {
            Ok(())
        }

        async fn beat(&self, _service_name: &str, _group_name: &str, _beat: &BeatInfo) -> Result<BeatResponse, ClientError> {
            Ok(BeatResponse { period_ms: 5000 })
        }
    }

    struct RecordingListener {
        count: AtomicUsize,
    }

    impl InstancesChangeListener for RecordingListener {
        fn on_change(&self, _event: &InstancesChangeEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn instance(ip: &str) -> Instance {
        Instance::new(ip, 8080, ClusterName::new("DEFAULT"))
    }

    #[tokio::test]
    async fn first_fetch_is_synchronous_and_populates_cache() {
        let dir = tempdir().unwrap();
        let client = Arc::new(StubClient {
            calls: AtomicUsize::new(0),
            hosts: Mutex::new(vec![instance("10.0.0.1")]),
        });
        let reactor = HostReactor::new(client, ClientConfig::default(), dir.path().join("cache"), dir.path().join("failover"));

        let info = reactor.get_service_info("orders", "DEFAULT_GROUP", "").await;
        assert_eq!(info.hosts.len(), 1);

        reactor.watch.tasks.lock().unwrap().remove(&cache_key_for("orders", "DEFAULT_GROUP", ""));
    }

    #[tokio::test]
    async fn subscribe_fires_listener_on_instance_change() {
        let dir = tempdir().unwrap();
        let client = Arc::new(StubClient {
            calls: AtomicUsize::new(0),
            hosts: Mutex::new(vec![instance("10.0.0.1")]),
        });
        let reactor = HostReactor::new(client, ClientConfig::default(), dir.path().join("cache"), dir.path().join("failover"));
        let listener = Arc::new(RecordingListener { count: AtomicUsize::new(0) });

        reactor.subscribe("orders", "DEFAULT_GROUP", "", listener.clone()).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);

        reactor.watch.tasks.lock().unwrap().remove(&cache_key_for("orders", "DEFAULT_GROUP", ""));
    }

    #[tokio::test]
    async fn push_empty_protection_keeps_previous_list() {
        let dir = tempdir().unwrap();
        let client = Arc::new(StubClient {
            calls: AtomicUsize::new(0),
            hosts: Mutex::new(vec![instance("10.0.0.1")]),
        });
        let mut config = ClientConfig::default();
        config.push_empty_protection = true;
        let reactor = HostReactor::new(client, config, dir.path().join("cache"), dir.path().join("failover"));

        reactor.get_service_info("orders", "DEFAULT_GROUP", "").await;
        reactor.watch.tasks.lock().unwrap().remove(&cache_key_for("orders", "DEFAULT_GROUP", ""));

        let empty = ServiceInfo::empty(ServiceName::new("orders"), GroupName::new("DEFAULT_GROUP"), String::new());
        let installed = reactor.install(cache_key_for("orders", "DEFAULT_GROUP", ""), empty).await;
        assert_eq!(installed.hosts.len(), 1);
    }

    struct SlowClient {
        calls: AtomicUsize,
        hosts: Vec<Instance>,
    }

    #[async_trait]
    impl ServerQueryClient for SlowClient {
        async fn query_service(
            &self,
            service_name: &str,
            group_name: &str,
            clusters: &str,
            _udp_port: u16,
            _healthy_only: bool,
        ) -> Result<ServiceInfo, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut info = ServiceInfo::empty(ServiceName::new(service_name), GroupName::new(group_name), clusters.to_string());
            info.hosts = self.hosts.clone();
            Ok(info)
        }

        async fn refresh_only(&self, _service_name: &str, _group_name: &str, _clusters: &str) -> Result<(), ClientError> {
            Ok(())
        }

        async fn beat(&self, _service_name: &str, _group_name: &str, _beat: &BeatInfo) -> Result<BeatResponse, ClientError> {
            Ok(BeatResponse { period_ms: 5000 })
        }
    }

    /// Scenario 5: a second caller arriving while the first fetch is still
    /// in flight rendezvous on the same result instead of issuing its own
    /// query.
    #[tokio::test]
    async fn concurrent_first_fetch_callers_rendezvous_on_one_query() {
        let dir = tempdir().unwrap();
        let client = Arc::new(SlowClient {
            calls: AtomicUsize::new(0),
            hosts: vec![instance("10.0.0.1")],
        });
        let reactor = HostReactor::new(client.clone(), ClientConfig::default(), dir.path().join("cache"), dir.path().join("failover"));

        let reactor_a = reactor.clone();
        let reactor_b = reactor.clone();
        let (first, second) = tokio::join!(
            reactor_a.get_service_info("orders", "DEFAULT_GROUP", ""),
            reactor_b.get_service_info("orders", "DEFAULT_GROUP", "")
        );

        assert_eq!(first.hosts.len(), 1);
        assert_eq!(second.hosts.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        reactor.watch.tasks.lock().unwrap().remove(&cache_key_for("orders", "DEFAULT_GROUP", ""));
    }

    /// Scenario 6: three consecutive empty replies raise the fail count to
    /// 3 and widen the backoff to `cacheMillis << failCount`; a following
    /// non-empty reply resets the fail count.
    #[tokio::test]
    async fn repeated_empty_replies_raise_fail_count_until_reset() {
        let dir = tempdir().unwrap();
        let client = Arc::new(StubClient {
            calls: AtomicUsize::new(0),
            hosts: Mutex::new(vec![]),
        });
        let reactor = HostReactor::new(client.clone(), ClientConfig::default(), dir.path().join("cache"), dir.path().join("failover"));
        let key = cache_key_for("orders", "DEFAULT_GROUP", "");

        for expected in 1..=3u32 {
            reactor.update_service_now("orders", "DEFAULT_GROUP", "").await;
            let fail_count = *reactor
                .watch
                .fail_counts
                .lock()
                .unwrap()
                .get(&key)
                .expect("fail count recorded for repeated empty replies");
            assert_eq!(fail_count, expected);
        }

        *client.hosts.lock().unwrap() = vec![instance("10.0.0.1")];
        reactor.update_service_now("orders", "DEFAULT_GROUP", "").await;
        assert!(reactor.watch.fail_counts.lock().unwrap().get(&key).is_none());
    }
}
