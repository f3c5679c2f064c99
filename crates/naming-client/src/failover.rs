//! Failover reactor (§4.I): serves a stale-but-available snapshot when an
//! operator flips an on-disk switch, instead of the live `serviceInfoMap`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use naming_types::ServiceInfo;

use crate::disk_cache;
use crate::error::ClientError;

const SWITCH_FILE_NAME: &str = "switch";

pub struct FailoverReactor {
    dir: PathBuf,
    switch_file: PathBuf,
    snapshot: RwLock<Option<HashMap<String, ServiceInfo>>>,
}

impl FailoverReactor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let switch_file = dir.join(SWITCH_FILE_NAME);
        Self {
            dir,
            switch_file,
            snapshot: RwLock::new(None),
        }
    }

    pub fn is_switched_on(&self) -> bool {
        self.switch_file.exists()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists the current `serviceInfoMap` to the failover directory so
    /// it is available if the switch is later flipped on.
    pub fn snapshot_now(&self, current: &HashMap<String, ServiceInfo>) -> Result<(), ClientError> {
        std::fs::create_dir_all(&self.dir)?;
        for info in current.values() {
            disk_cache::write(&self.dir, info)?;
        }
        Ok(())
    }

    /// Returns the failover view of `cache_key`, loading the snapshot from
    /// disk lazily on first use after the switch flips on. Returns `None`
    /// if the switch is off or the key has no snapshot entry.
    pub fn get(&self, cache_key: &str) -> Option<ServiceInfo> {
        if !self.is_switched_on() {
            return None;
        }

        {
            let guard = self.snapshot.read().expect("failover snapshot lock poisoned");
            if let Some(loaded) = guard.as_ref() {
                return loaded.get(cache_key).cloned();
            }
        }

        let loaded = disk_cache::read_all(&self.dir);
        let result = loaded.get(cache_key).cloned();
        let mut guard = self.snapshot.write().expect("failover snapshot lock poisoned");
        *guard = Some(loaded);
        result
    }

    /// Forces the next [`get`](Self::get) to reload from disk, used after
    /// the switch flips off so a later flip-on doesn't serve a stale
    /// in-memory copy.
    pub fn invalidate(&self) {
        let mut guard = self.snapshot.write().expect("failover snapshot lock poisoned");
        *guard = None;
    }
}
