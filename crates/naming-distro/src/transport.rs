//! The external collaborator seam for server-to-server replication (§6).
//!
//! `Transport` is deliberately abstract: this crate models the distro
//! algorithm, not an HTTP/TCP stack. A production embedding implements
//! `Transport` against whatever cluster transport it already has, mirroring
//! the teacher's `ClusterTransport` seam in its own client/server layers.

use std::collections::HashMap;

use async_trait::async_trait;
use naming_types::{Checksum, Datum, Key};

use crate::error::DistroError;

/// Which half of a sync-all payload is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOperation {
    Change,
    Delete,
}

/// The body of a sync-all push to a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Data(HashMap<Key, Datum>),
    Deletes(Vec<Key>),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Pushes a batch of changed or deleted keys to `peer`. Fire-and-forget
    /// from the protocol's point of view: failures are logged and retried
    /// implicitly by the next verify round.
    async fn sync_all(
        &self,
        peer: &str,
        operation: DataOperation,
        payload: SyncPayload,
    ) -> Result<(), DistroError>;

    /// Advertises this node's owned checksums to `peer`. No response body
    /// is expected; `peer` reconciles asynchronously via its own verify
    /// handling.
    async fn verify(&self, peer: &str, checksums: HashMap<Key, Checksum>) -> Result<(), DistroError>;

    /// Pulls the full Datums for `keys` from `peer`.
    async fn pull(&self, peer: &str, keys: Vec<Key>) -> Result<HashMap<Key, Datum>, DistroError>;
}
