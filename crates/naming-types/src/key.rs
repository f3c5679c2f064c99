//! Bijective codec between the composite `(namespace, group, service, kind)`
//! tuple and the canonical string key used on the wire and in the data store.
//!
//! Mirrors the source system's two key families:
//! - `com.alibaba.nacos.naming.iplist.ephemeral.<namespace>##<group@@service>`
//! - `com.alibaba.nacos.naming.service.meta.<namespace>##<group@@service>`
//!
//! All protocol decisions route on the prefix; nothing else in the crate
//! re-derives "is this ephemeral" from string matching.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for ephemeral instance-list keys.
pub const EPHEMERAL_INSTANCE_LIST_PREFIX: &str = "com.alibaba.nacos.naming.iplist.ephemeral.";
/// Prefix for service-metadata keys.
pub const SERVICE_META_PREFIX: &str = "com.alibaba.nacos.naming.service.meta.";

/// A namespace identifier. Empty string is the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NamespaceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_newtype!(GroupName);
string_newtype!(ServiceName);
string_newtype!(ClusterName);

/// Default group used when a service is registered without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Which dataset family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// The ephemeral instance list for a service.
    InstanceListEphemeral,
    /// The service metadata record.
    ServiceMeta,
}

impl KeyKind {
    fn prefix(self) -> &'static str {
        match self {
            KeyKind::InstanceListEphemeral => EPHEMERAL_INSTANCE_LIST_PREFIX,
            KeyKind::ServiceMeta => SERVICE_META_PREFIX,
        }
    }
}

/// A fully-qualified naming-service key.
///
/// `Display`/`FromStr` round-trip through the canonical wire string; nothing
/// else in the crate should hand-build these strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: KeyKind,
    namespace_id: NamespaceId,
    group: GroupName,
    service: ServiceName,
}

// KeyKind doesn't derive Ord/PartialOrd; provide it by prefix string so Key
// can live in a BTreeMap for deterministic iteration.
impl PartialOrd for KeyKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyKind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.prefix().cmp(other.prefix())
    }
}

impl Key {
    pub fn new(kind: KeyKind, namespace_id: NamespaceId, group: GroupName, service: ServiceName) -> Self {
        Self {
            kind,
            namespace_id,
            group,
            service,
        }
    }

    pub fn instance_list_ephemeral(namespace_id: NamespaceId, group: GroupName, service: ServiceName) -> Self {
        Self::new(KeyKind::InstanceListEphemeral, namespace_id, group, service)
    }

    pub fn service_meta(namespace_id: NamespaceId, group: GroupName, service: ServiceName) -> Self {
        Self::new(KeyKind::ServiceMeta, namespace_id, group, service)
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn namespace_id(&self) -> &NamespaceId {
        &self.namespace_id
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the paired key of the other kind for the same service.
    pub fn with_kind(&self, kind: KeyKind) -> Self {
        Self {
            kind,
            namespace_id: self.namespace_id.clone(),
            group: self.group.clone(),
            service: self.service.clone(),
        }
    }

    /// The `group@@service` identifier used in the grouped-service name space.
    pub fn grouped_service_name(&self) -> String {
        format!("{}@@{}", self.group, self.service)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}##{}",
            self.kind.prefix(),
            self.namespace_id,
            self.grouped_service_name()
        )
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = if let Some(rest) = raw.strip_prefix(EPHEMERAL_INSTANCE_LIST_PREFIX) {
            (KeyKind::InstanceListEphemeral, rest)
        } else if let Some(rest) = raw.strip_prefix(SERVICE_META_PREFIX) {
            (KeyKind::ServiceMeta, rest)
        } else {
            return Err(KeyError::UnknownPrefix(raw.to_string()));
        };

        let (namespace_id, grouped) = rest
            .split_once("##")
            .ok_or_else(|| KeyError::MissingNamespaceSeparator(raw.to_string()))?;

        let (group, service) = grouped
            .split_once("@@")
            .ok_or_else(|| KeyError::MissingGroupServiceSeparator(raw.to_string()))?;

        Ok(Key::new(
            kind,
            NamespaceId::new(namespace_id),
            GroupName::new(group),
            ServiceName::new(service),
        ))
    }
}

/// Returns true iff `raw` has the ephemeral instance-list prefix, without
/// fully parsing the key. Used on the hot path where only the dataset family
/// matters (e.g. routing a received Datum to the right listener kind).
pub fn matches_ephemeral_instance_list_key(raw: &str) -> bool {
    raw.starts_with(EPHEMERAL_INSTANCE_LIST_PREFIX)
}

/// Errors parsing a canonical key string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key has unknown prefix: {0}")]
    UnknownPrefix(String),
    #[error("key is missing the namespace separator '##': {0}")]
    MissingNamespaceSeparator(String),
    #[error("key is missing the group/service separator '@@': {0}")]
    MissingGroupServiceSeparator(String),
}
