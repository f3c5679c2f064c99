//! Stable checksums over instance lists and service metadata.
//!
//! Two Datums with equal logical content must produce equal checksums
//! regardless of host order, map iteration order, or which serialization
//! path constructed them. We enforce this by canonicalising (sorting) the
//! inputs before hashing, rather than relying on callers to pass sorted
//! data.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use serde::{Deserialize, Serialize};

use crate::instance::Instance;

/// A stable checksum rendered as a lowercase hex string, matching the
/// wire shape (`key -> checksum-string`) used by the verify protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_hash(value: u64) -> Self {
        Self(format!("{value:016x}"))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical, order-independent hash input for a single instance's mutable
/// identity fields.
fn canonical_instance_tuple(instance: &Instance) -> (String, u16, String, bool, bool, bool, u64, Vec<(String, String)>) {
    let weight_bits = instance.weight.to_bits();
    let mut metadata: Vec<(String, String)> = instance
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    metadata.sort();
    (
        instance.ip.clone(),
        instance.port,
        instance.cluster_name.to_string(),
        instance.ephemeral,
        instance.healthy,
        instance.marked,
        weight_bits,
        metadata,
    )
}

/// Computes a checksum for an instance list, independent of input ordering.
pub fn checksum_of_instances(instances: &[Instance]) -> Checksum {
    let mut tuples: Vec<_> = instances.iter().map(canonical_instance_tuple).collect();
    tuples.sort();

    let mut hasher = DefaultHasher::new();
    tuples.len().hash(&mut hasher);
    for tuple in &tuples {
        tuple.0.hash(&mut hasher);
        tuple.1.hash(&mut hasher);
        tuple.2.hash(&mut hasher);
        tuple.3.hash(&mut hasher);
        tuple.4.hash(&mut hasher);
        tuple.5.hash(&mut hasher);
        tuple.6.hash(&mut hasher);
        for (k, v) in &tuple.7 {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
    }
    Checksum::from_hash(hasher.finish())
}
