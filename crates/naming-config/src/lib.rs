//! Layered configuration for the naming service.
//!
//! Configuration is split into a `[server]` table (distro protocol and
//! registry tuning) and a `[client]` table (host reactor tuning), mirroring
//! the split between the server-side and client-side crates in this
//! workspace.

pub mod error;
pub mod loader;
pub mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

use serde::{Deserialize, Serialize};

/// Root configuration object, deserialized from the layered sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Server-side tuning: distro protocol cadence, registry lifetimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Period, in milliseconds, between dispatcher ticks that drive the
    /// beat-check sweep and the distro verify cycle.
    pub task_dispatch_period_ms: u64,
    /// Interval between distro protocol verify rounds.
    pub verify_interval_ms: u64,
    /// An instance with no beat for longer than this is marked unhealthy.
    pub heartbeat_timeout_ms: u64,
    /// An instance unhealthy for longer than this is removed outright.
    pub delete_timeout_ms: u64,
    pub health_check_enabled: bool,
    /// Whether the beat-check task is permitted to expire instances at all.
    pub expire_instance: bool,
    pub default_instance_ephemeral: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            task_dispatch_period_ms: 2_000,
            verify_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            delete_timeout_ms: 30_000,
            health_check_enabled: true,
            expire_instance: true,
            default_instance_ephemeral: true,
        }
    }
}

/// Client-side tuning: host reactor polling, failover, disk cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// If true, an empty push/pull result is treated as suspect and the
    /// previously cached instance list is kept rather than applied.
    pub push_empty_protection: bool,
    /// If true, the disk cache is consulted for an initial instance list
    /// before the first successful server round-trip completes.
    pub load_cache_at_start: bool,
    /// Number of worker threads driving the polling executor.
    pub polling_thread_count: usize,
    /// If true, the client blocks briefly on startup for each subscribed
    /// service's first successful fetch rather than returning immediately
    /// with an empty `ServiceInfo`.
    pub data_warmup: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push_empty_protection: false,
            load_cache_at_start: false,
            polling_thread_count: 1,
            data_warmup: true,
        }
    }
}
