//! Client-side error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server query failed: {0}")]
    Query(#[source] anyhow::Error),

    #[error("disk cache i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cached payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("timed out waiting for in-flight update after {0:?}")]
    RendezvousTimeout(std::time::Duration),
}
