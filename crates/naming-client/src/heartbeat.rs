//! Client-side heartbeat reactor (§4.K).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::server_query::ServerQueryClient;

pub const DEFAULT_BEAT_PERIOD_MS: u64 = 5_000;

/// The beat payload for one (service, ip, port) registration, plus the
/// server-assigned beat period.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatInfo {
    pub ip: String,
    pub port: u16,
    pub cluster_name: String,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    pub period_ms: u64,
}

impl BeatInfo {
    pub fn new(ip: impl Into<String>, port: u16, cluster_name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port,
            cluster_name: cluster_name.into(),
            weight: 1.0,
            metadata: BTreeMap::new(),
            period_ms: DEFAULT_BEAT_PERIOD_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BeatKey {
    service_name: String,
    group_name: String,
    ip: String,
    port: u16,
}

struct BeatHandle {
    info: Arc<Mutex<BeatInfo>>,
    task: JoinHandle<()>,
}

/// Drives one scheduled beat task per registered (service, ip, port),
/// forever, best-effort: a network failure never stops the schedule, it
/// only falls back to the previous interval and retries.
pub struct HeartbeatReactor<C: ServerQueryClient + 'static> {
    client: Arc<C>,
    beats: RwLock<HashMap<BeatKey, BeatHandle>>,
}

impl<C: ServerQueryClient + 'static> HeartbeatReactor<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            beats: RwLock::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the beat schedule for one instance registration.
    pub fn register(&self, service_name: impl Into<String>, group_name: impl Into<String>, beat_info: BeatInfo) {
        let service_name = service_name.into();
        let group_name = group_name.into();
        let key = BeatKey {
            service_name: service_name.clone(),
            group_name: group_name.clone(),
            ip: beat_info.ip.clone(),
            port: beat_info.port,
        };

        self.cancel(&key);

        let info = Arc::new(Mutex::new(beat_info));
        let task = tokio::spawn(beat_loop(self.client.clone(), service_name, group_name, info.clone()));

        let mut guard = self.beats.write().expect("beats lock poisoned");
        guard.insert(key, BeatHandle { info, task });
    }

    pub fn unregister(&self, service_name: &str, group_name: &str, ip: &str, port: u16) {
        let key = BeatKey {
            service_name: service_name.to_string(),
            group_name: group_name.to_string(),
            ip: ip.to_string(),
            port,
        };
        self.cancel(&key);
    }

    fn cancel(&self, key: &BeatKey) {
        let mut guard = self.beats.write().expect("beats lock poisoned");
        if let Some(handle) = guard.remove(key) {
            handle.task.abort();
        }
    }

    /// Refreshes the cluster/weight/metadata of an in-flight beat so that
    /// server-driven changes (§4.G, "modified" instances) propagate to the
    /// next beat without restarting the schedule.
    pub fn refresh(
        &self,
        service_name: &str,
        group_name: &str,
        ip: &str,
        port: u16,
        cluster_name: String,
        weight: f64,
        metadata: BTreeMap<String, String>,
    ) {
        let key = BeatKey {
            service_name: service_name.to_string(),
            group_name: group_name.to_string(),
            ip: ip.to_string(),
            port,
        };
        let guard = self.beats.read().expect("beats lock poisoned");
        if let Some(handle) = guard.get(&key) {
            let mut info = handle.info.lock().expect("beat info lock poisoned");
            info.cluster_name = cluster_name;
            info.weight = weight;
            info.metadata = metadata;
        }
    }

    pub fn active_count(&self) -> usize {
        self.beats.read().expect("beats lock poisoned").len()
    }
}

async fn beat_loop<C: ServerQueryClient + 'static>(
    client: Arc<C>,
    service_name: String,
    group_name: String,
    info: Arc<Mutex<BeatInfo>>,
) {
    loop {
        let snapshot = info.lock().expect("beat info lock poisoned").clone();
        tokio::time::sleep(Duration::from_millis(snapshot.period_ms)).await;

        let snapshot = info.lock().expect("beat info lock poisoned").clone();
        match client.beat(&service_name, &group_name, &snapshot).await {
            Ok(response) => {
                let mut info = info.lock().expect("beat info lock poisoned");
                info.period_ms = response.period_ms;
            }
            Err(err) => {
                warn!(service = %service_name, error = %err, "heartbeat failed, retrying at previous interval");
            }
        }
    }
}
