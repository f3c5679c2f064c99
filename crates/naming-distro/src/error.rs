//! Distro protocol error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistroError {
    #[error("transport failure talking to {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("ownership contradiction: {source_peer} advertised key owned by this node")]
    OwnershipContradiction { source_peer: String },

    #[error("malformed snapshot payload: {0}")]
    MalformedSnapshot(#[from] serde_json::Error),
}
