//! The distro protocol (§4.E): local mutation, periodic verify, and the
//! receive-verify reconciliation state machine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use naming_store::{Action, DataStore, Notifier};
use naming_types::{Datum, DatumValue, Key};
use tracing::{error, warn};

use crate::error::DistroError;
use crate::mapper::DistroMapper;
use crate::transport::{DataOperation, SyncPayload, Transport};

/// Invoked when a bulk install touches a key with no registered listener,
/// so that the registry can synthesize a service container on the fly
/// (§4.E, "processData"). Returns true if a container now exists and
/// delivery should proceed.
pub trait DefaultServiceHook: Send + Sync {
    fn ensure_service(&self, key: &Key) -> bool;
}

/// Coordinates local mutations, outbound verify broadcasts, and inbound
/// verify/pull reconciliation for one node's view of the ephemeral dataset.
pub struct DistroProtocol {
    mapper: Arc<DistroMapper>,
    store: Arc<DataStore>,
    notifier: Arc<Notifier>,
    transport: Arc<dyn Transport>,
    default_service_hook: RwLock<Option<Arc<dyn DefaultServiceHook>>>,
    in_flight: RwLock<HashSet<String>>,
    dirty: RwLock<HashMap<String, HashSet<Key>>>,
    timestamps: RwLock<HashMap<Key, u64>>,
    default_ephemeral_switch: bool,
    initialized: AtomicBool,
    verify_rounds: AtomicU64,
}

impl DistroProtocol {
    pub fn new(
        mapper: Arc<DistroMapper>,
        store: Arc<DataStore>,
        notifier: Arc<Notifier>,
        transport: Arc<dyn Transport>,
        default_ephemeral_switch: bool,
    ) -> Self {
        Self {
            mapper,
            store,
            notifier,
            transport,
            default_service_hook: RwLock::new(None),
            in_flight: RwLock::new(HashSet::new()),
            dirty: RwLock::new(HashMap::new()),
            timestamps: RwLock::new(HashMap::new()),
            default_ephemeral_switch,
            initialized: AtomicBool::new(false),
            verify_rounds: AtomicU64::new(0),
        }
    }

    /// Wires the default-service-container hook after construction: the
    /// hook's own implementation (the registry) needs an `Arc<DistroProtocol>`
    /// to build itself, so this can't be a consuming builder step.
    pub fn set_default_service_hook(&self, hook: Arc<dyn DefaultServiceHook>) {
        *self.default_service_hook.write().expect("default service hook lock poisoned") = Some(hook);
    }

    /// True once at least one full snapshot has been applied, or the
    /// `dataWarmup` gate is disabled. Mirrors `isInitialized` in §7.
    pub fn is_initialized(&self, data_warmup: bool) -> bool {
        !data_warmup || self.initialized.load(Ordering::SeqCst)
    }

    /// The local mutation path (§4.E): owner-side put. Only the owner of
    /// `key` may call this; callers are responsible for checking
    /// `mapper.responsible` first.
    pub fn put(&self, key: Key, value: DatumValue) {
        let timestamp = self.next_timestamp(&key);
        let datum = Datum::new(key.clone(), value, timestamp);
        self.store.put(datum);

        if self.notifier.has_listeners(&key) {
            self.notifier.enqueue_change(key.clone());
        }

        self.mark_dirty(&key);
    }

    /// The local removal path, used by the beat-check task's expiry sweep.
    pub fn remove(&self, key: &Key) {
        self.store.remove(key);
        self.notifier.enqueue_delete(key.clone());
        self.mark_dirty(key);
    }

    fn next_timestamp(&self, key: &Key) -> u64 {
        let mut guard = self.timestamps.write().expect("timestamp lock poisoned");
        let next = guard.get(key).copied().unwrap_or(0) + 1;
        guard.insert(key.clone(), next);
        next
    }

    fn mark_dirty(&self, key: &Key) {
        let Some(owner) = self.mapper.map_srv(&key.grouped_service_name()) else {
            return;
        };
        if owner != self.mapper.self_id() {
            return;
        }
        let mut dirty = self.dirty.write().expect("dirty set lock poisoned");
        for peer in self.mapper.peers() {
            if peer == owner {
                continue;
            }
            dirty.entry(peer).or_default().insert(key.clone());
        }
    }

    /// Drains and pushes pending sync-all batches to every peer. Intended
    /// to be driven by a scheduled tick at `taskDispatchPeriod / 2`.
    pub async fn run_sync_tick(&self) {
        let batches: Vec<(String, HashSet<Key>)> = {
            let mut dirty = self.dirty.write().expect("dirty set lock poisoned");
            dirty.drain().collect()
        };

        for (peer, keys) in batches {
            let mut present = HashMap::new();
            let mut deleted = Vec::new();
            for key in keys {
                match self.store.get(&key) {
                    Some(datum) => {
                        present.insert(key, datum);
                    }
                    None => deleted.push(key),
                }
            }

            if !present.is_empty() {
                if let Err(err) = self
                    .transport
                    .sync_all(&peer, DataOperation::Change, SyncPayload::Data(present))
                    .await
                {
                    warn!(%peer, error = %err, "sync-all push failed, will retry next tick");
                }
            }
            if !deleted.is_empty() {
                if let Err(err) = self
                    .transport
                    .sync_all(&peer, DataOperation::Delete, SyncPayload::Deletes(deleted))
                    .await
                {
                    warn!(%peer, error = %err, "sync-all delete push failed, will retry next tick");
                }
            }
        }
    }

    /// Broadcasts a checksum advertisement of every key this node owns to
    /// every other peer (§4.E, "Periodic verify").
    pub async fn run_verify_tick(&self) {
        self.verify_rounds.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.store.snapshot();
        let owned: HashMap<Key, naming_types::Checksum> = snapshot
            .into_iter()
            .filter(|(key, _)| self.mapper.responsible(&key.grouped_service_name()))
            .map(|(key, datum)| (key, datum.checksum))
            .collect();

        for peer in self.mapper.peers() {
            if peer == self.mapper.self_id() {
                continue;
            }
            if let Err(err) = self.transport.verify(&peer, owned.clone()).await {
                warn!(%peer, error = %err, "verify broadcast failed");
            }
        }
    }

    /// Receive-verify reconciliation (§4.E). Returns once the whole
    /// procedure -- removals, pull, install -- has completed or aborted.
    pub async fn on_receive_checksums(
        &self,
        source_peer: &str,
        incoming: HashMap<Key, naming_types::Checksum>,
    ) -> Result<(), DistroError> {
        {
            let mut guard = self.in_flight.write().expect("in-flight lock poisoned");
            if !guard.insert(source_peer.to_string()) {
                warn!(%source_peer, "verify already in flight for this source, dropping arrival");
                return Ok(());
            }
        }

        let result = self.reconcile(source_peer, incoming).await;

        {
            let mut guard = self.in_flight.write().expect("in-flight lock poisoned");
            guard.remove(source_peer);
        }

        result
    }

    async fn reconcile(
        &self,
        source_peer: &str,
        incoming: HashMap<Key, naming_types::Checksum>,
    ) -> Result<(), DistroError> {
        for key in incoming.keys() {
            if self.mapper.responsible(&key.grouped_service_name()) {
                error!(%source_peer, %key, "ownership contradiction: source advertised a key this node owns");
                return Err(DistroError::OwnershipContradiction {
                    source_peer: source_peer.to_string(),
                });
            }
        }

        let to_update: Vec<Key> = incoming
            .iter()
            .filter(|(key, checksum)| match self.store.get(key) {
                Some(local) => &local.checksum != *checksum,
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect();

        let local_keys = self.store.keys();
        let to_remove: Vec<Key> = local_keys
            .into_iter()
            .filter(|key| {
                self.mapper.map_srv(&key.grouped_service_name()).as_deref() == Some(source_peer)
                    && !incoming.contains_key(key)
            })
            .collect();

        for key in &to_remove {
            self.store.remove(key);
            self.notifier.enqueue_delete(key.clone());
        }

        if !to_update.is_empty() {
            match self.transport.pull(source_peer, to_update).await {
                Ok(snapshot) => self.install_snapshot(snapshot),
                Err(err) => {
                    warn!(%source_peer, error = %err, "pull failed, will retry on next verify tick");
                }
            }
        }

        Ok(())
    }

    /// Bulk install of a server-to-server snapshot (§4.E, "processData").
    pub fn install_snapshot(&self, data: HashMap<Key, Datum>) {
        for (key, datum) in data {
            let stale = self
                .store
                .get(&key)
                .is_some_and(|local| local.is_stale_against(datum.timestamp));
            if stale {
                warn!(%key, incoming_timestamp = datum.timestamp, "dropping stale snapshot entry");
                continue;
            }
            self.store.put(datum);

            if !self.notifier.has_listeners(&key) {
                let hook = self.default_service_hook.read().expect("default service hook lock poisoned").clone();
                let created = match (hook, self.default_ephemeral_switch) {
                    (Some(hook), true) => hook.ensure_service(&key),
                    _ => false,
                };
                if !created {
                    warn!(%key, "no listener and no default-service hook, dropping snapshot entry");
                    continue;
                }
            }

            self.notifier.notify_now(&self.store, &key, Action::Change);
            // Re-install after notification: defends against a listener
            // that mutated the stored value out from under us. Our
            // listener traits take the value by reference so this is
            // currently a no-op write, kept for shape parity.
            if let Some(datum) = self.store.get(&key) {
                self.store.put(datum);
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
    }
}
