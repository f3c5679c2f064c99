//! The sharded, eventually-consistent replication protocol for ephemeral
//! instance data.
//!
//! This crate has no opinion on how bytes move between peers -- that is
//! the [`Transport`] seam -- nor on how instances are created or expired,
//! which belongs to `naming-registry`. It owns exactly the algorithm in
//! the source design's distro protocol: ownership mapping, local mutation
//! bookkeeping, periodic verify, and receive-verify reconciliation.

pub mod error;
pub mod mapper;
pub mod protocol;
pub mod transport;

pub use error::DistroError;
pub use mapper::DistroMapper;
pub use protocol::{DefaultServiceHook, DistroProtocol};
pub use transport::{DataOperation, SyncPayload, Transport};
