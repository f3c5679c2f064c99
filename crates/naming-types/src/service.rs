//! `Service` (server-side authoritative container) and `ServiceInfo`
//! (client-side cached view).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checksum::{checksum_of_instances, Checksum};
use crate::instance::Instance;
use crate::key::{ClusterName, GroupName, NamespaceId, ServiceName};

/// The authoritative, server-side record for a service: all instances
/// grouped by cluster, plus a checksum recomputed on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub namespace_id: NamespaceId,
    pub group_name: GroupName,
    pub name: ServiceName,
    pub last_modified_millis: u64,
    pub checksum: Checksum,
    pub clusters: BTreeMap<ClusterName, Vec<Instance>>,
}

impl Service {
    pub fn new(namespace_id: NamespaceId, group_name: GroupName, name: ServiceName, now_millis: u64) -> Self {
        let mut service = Self {
            namespace_id,
            group_name,
            name,
            last_modified_millis: now_millis,
            checksum: checksum_of_instances(&[]),
            clusters: BTreeMap::new(),
        };
        service.recompute_checksum(now_millis);
        service
    }

    /// All instances across all clusters, in canonical (sorted) order.
    pub fn all_instances(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.clusters.values().flatten().cloned().collect();
        all.sort_by(|a, b| (a.cluster_name.as_str(), &a.ip, a.port).cmp(&(b.cluster_name.as_str(), &b.ip, b.port)));
        all
    }

    /// Recomputes `checksum` from the current instance set. Must be called
    /// after every mutation of `clusters`.
    pub fn recompute_checksum(&mut self, now_millis: u64) {
        self.checksum = checksum_of_instances(&self.all_instances());
        self.last_modified_millis = now_millis;
    }

    pub fn upsert_instance(&mut self, instance: Instance, now_millis: u64) {
        let cluster = instance.cluster_name.clone();
        let bucket = self.clusters.entry(cluster).or_default();
        if let Some(existing) = bucket
            .iter_mut()
            .find(|i| i.ip == instance.ip && i.port == instance.port)
        {
            *existing = instance;
        } else {
            bucket.push(instance);
        }
        self.recompute_checksum(now_millis);
    }

    pub fn remove_instance(&mut self, cluster: &ClusterName, ip: &str, port: u16, now_millis: u64) -> bool {
        let removed = if let Some(bucket) = self.clusters.get_mut(cluster) {
            let before = bucket.len();
            bucket.retain(|i| !(i.ip == ip && i.port == port));
            bucket.len() != before
        } else {
            false
        };
        if removed {
            self.recompute_checksum(now_millis);
        }
        removed
    }
}

/// A lightweight, checksum-bearing summary of a `Service`, used as the
/// `ServiceMeta` half of the tagged `DatumValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub namespace_id: NamespaceId,
    pub group_name: GroupName,
    pub name: ServiceName,
    pub last_modified_millis: u64,
    pub checksum: Checksum,
}

impl From<&Service> for ServiceMetadata {
    fn from(service: &Service) -> Self {
        Self {
            namespace_id: service.namespace_id.clone(),
            group_name: service.group_name.clone(),
            name: service.name.clone(),
            last_modified_millis: service.last_modified_millis,
            checksum: service.checksum.clone(),
        }
    }
}

/// The client-side cached view of a service: what `getServiceInfo` returns
/// and what gets diffed on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: ServiceName,
    pub group_name: GroupName,
    /// Comma-separated cluster filter the client subscribed with (may be
    /// empty for "all clusters").
    pub clusters: String,
    pub hosts: Vec<Instance>,
    pub last_ref_time: u64,
    pub cache_millis: u64,
    pub json_from_server: Option<String>,
}

impl ServiceInfo {
    pub fn empty(name: ServiceName, group_name: GroupName, clusters: String) -> Self {
        Self {
            name,
            group_name,
            clusters,
            hosts: Vec::new(),
            last_ref_time: 0,
            cache_millis: 1000,
            json_from_server: None,
        }
    }

    /// Cache-file and map key: `<group@@service>@@<clusters>`.
    pub fn cache_key(&self) -> String {
        if self.clusters.is_empty() {
            format!("{}@@{}", self.group_name, self.name)
        } else {
            format!("{}@@{}@@{}", self.group_name, self.name, self.clusters)
        }
    }

    /// A payload is valid iff it has at least one host. An empty or
    /// malformed payload fails validation, which matters when
    /// `pushEmptyProtection` is enabled.
    pub fn validate(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn ip_count(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> NamespaceId {
        NamespaceId::new("public")
    }

    #[test]
    fn checksum_changes_on_upsert_and_remove() {
        let mut service = Service::new(ns(), GroupName::new("DEFAULT_GROUP"), ServiceName::new("orders"), 0);
        let initial = service.checksum.clone();

        let instance = Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT"));
        service.upsert_instance(instance.clone(), 1);
        assert_ne!(initial, service.checksum);

        let after_insert = service.checksum.clone();
        service.remove_instance(&ClusterName::new("DEFAULT"), "10.0.0.1", 8080, 2);
        assert_ne!(after_insert, service.checksum);
        assert_eq!(service.checksum, initial);
    }

    #[test]
    fn all_instances_are_canonically_ordered() {
        let mut service = Service::new(ns(), GroupName::new("DEFAULT_GROUP"), ServiceName::new("orders"), 0);
        service.upsert_instance(Instance::new("10.0.0.2", 8080, ClusterName::new("DEFAULT")), 1);
        service.upsert_instance(Instance::new("10.0.0.1", 8080, ClusterName::new("DEFAULT")), 2);
        let ips: Vec<_> = service.all_instances().into_iter().map(|i| i.ip).collect();
        assert_eq!(ips, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[test]
    fn service_info_cache_key_includes_clusters_when_present() {
        let info = ServiceInfo::empty(ServiceName::new("orders"), GroupName::new("DEFAULT_GROUP"), String::new());
        assert_eq!(info.cache_key(), "DEFAULT_GROUP@@orders");

        let info = ServiceInfo::empty(
            ServiceName::new("orders"),
            GroupName::new("DEFAULT_GROUP"),
            "a,b".to_string(),
        );
        assert_eq!(info.cache_key(), "DEFAULT_GROUP@@orders@@a,b");
    }

    #[test]
    fn empty_service_info_fails_validation() {
        let info = ServiceInfo::empty(ServiceName::new("orders"), GroupName::new("DEFAULT_GROUP"), String::new());
        assert!(!info.validate());
    }
}
