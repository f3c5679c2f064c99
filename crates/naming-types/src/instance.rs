//! The `Instance` data model: a single network endpoint belonging to a
//! named service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::ClusterName;

/// Default heartbeat timeout: an instance with no beat for this long is
/// flipped unhealthy.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;
/// Default delete timeout: an instance with no beat for this long is deleted.
pub const DEFAULT_DELETE_TIMEOUT_MS: u64 = 30_000;

/// A service endpoint.
///
/// `marked` instances are administratively pinned: the beat-check task
/// never flips their health or deletes them regardless of `last_beat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub cluster_name: ClusterName,
    pub ephemeral: bool,
    pub healthy: bool,
    pub marked: bool,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    /// Millis since epoch of the last received heartbeat.
    pub last_beat: u64,
    pub heartbeat_timeout_ms: u64,
    pub delete_timeout_ms: u64,
}

impl Instance {
    /// Creates a healthy, ephemeral instance with default timeouts and the
    /// given `last_beat` left at zero (caller should set it on register).
    pub fn new(ip: impl Into<String>, port: u16, cluster_name: ClusterName) -> Self {
        Self {
            ip: ip.into(),
            port,
            cluster_name,
            ephemeral: true,
            healthy: true,
            marked: false,
            weight: 1.0,
            metadata: BTreeMap::new(),
            last_beat: 0,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            delete_timeout_ms: DEFAULT_DELETE_TIMEOUT_MS,
        }
    }

    /// The `ip:port` identity tuple used for host-reactor diffing.
    pub fn to_inet_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// True if this instance has not beaten within its heartbeat timeout.
    pub fn is_heartbeat_timed_out(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_beat) > self.heartbeat_timeout_ms
    }

    /// True if this instance has not beaten within its delete timeout.
    pub fn is_delete_timed_out(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_beat) > self.delete_timeout_ms
    }

    pub fn record_beat(&mut self, now_millis: u64) {
        self.last_beat = now_millis;
    }
}
