//! Core data model and key codec for the naming service.
//!
//! This crate has no knowledge of networking, scheduling, or storage
//! backends -- it is the vocabulary shared by the server-side distro
//! protocol (`naming-distro`, `naming-registry`) and the client-side host
//! reactor (`naming-client`).

pub mod checksum;
pub mod datum;
pub mod instance;
pub mod key;
pub mod service;

pub use checksum::{checksum_of_instances, Checksum};
pub use datum::{Datum, DatumValue};
pub use instance::{Instance, DEFAULT_DELETE_TIMEOUT_MS, DEFAULT_HEARTBEAT_TIMEOUT_MS};
pub use key::{
    matches_ephemeral_instance_list_key, ClusterName, GroupName, Key, KeyError, KeyKind,
    NamespaceId, ServiceName, DEFAULT_GROUP,
};
pub use service::{Service, ServiceInfo, ServiceMetadata};
