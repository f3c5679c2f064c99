//! The replication unit (`Datum`) and its tagged value type.
//!
//! The source system infers `Datum<T>`'s type parameter from the key
//! prefix at deserialization time via runtime reflection. That pattern
//! doesn't translate; instead `DatumValue` is a closed sum type selected
//! by `Key::kind()` when a Datum is constructed or parsed.

use serde::{Deserialize, Serialize};

use crate::checksum::{checksum_of_instances, Checksum};
use crate::instance::Instance;
use crate::key::Key;
use crate::service::ServiceMetadata;

/// The value carried by a `Datum`, tagged by which key family it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatumValue {
    InstanceList(Vec<Instance>),
    ServiceMeta(ServiceMetadata),
}

impl DatumValue {
    pub fn as_instance_list(&self) -> Option<&[Instance]> {
        match self {
            DatumValue::InstanceList(instances) => Some(instances),
            DatumValue::ServiceMeta(_) => None,
        }
    }

    pub fn as_service_meta(&self) -> Option<&ServiceMetadata> {
        match self {
            DatumValue::InstanceList(_) => None,
            DatumValue::ServiceMeta(meta) => Some(meta),
        }
    }

    fn checksum(&self) -> Checksum {
        match self {
            DatumValue::InstanceList(instances) => checksum_of_instances(instances),
            DatumValue::ServiceMeta(meta) => meta.checksum.clone(),
        }
    }
}

/// A value plus its logical timestamp and checksum: the unit the distro
/// protocol replicates between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub key: Key,
    pub value: DatumValue,
    /// Logical sequence number, local to the owning peer. Strictly
    /// increasing on every `put` by the owner; non-owners only ever
    /// install Datums received from elsewhere and never bump this.
    pub timestamp: u64,
    pub checksum: Checksum,
}

impl Datum {
    /// Builds a Datum with a freshly computed checksum for the given value
    /// at the given owner-local timestamp.
    pub fn new(key: Key, value: DatumValue, timestamp: u64) -> Self {
        let checksum = value.checksum();
        Self {
            key,
            value,
            timestamp,
            checksum,
        }
    }

    /// True if installing `other` in place of `self` would violate the
    /// monotone-timestamp invariant (i.e. `other` is stale).
    pub fn is_stale_against(&self, incoming_timestamp: u64) -> bool {
        incoming_timestamp <= self.timestamp
    }
}
