//! Naming service server entry point.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use naming_config::ConfigLoader;
use naming_distro::{DataOperation, DistroError, SyncPayload, Transport};
use naming_server::{Dispatcher, ServerContext};
use naming_types::{Checksum, Datum, Key};
use tracing::info;

/// Logs outbound replication traffic instead of sending it anywhere.
/// Sufficient for single-node operation or local development; a real
/// multi-node deployment wires in a transport backed by its own cluster
/// RPC mechanism.
struct LoggingTransport;

#[async_trait]
impl Transport for LoggingTransport {
    async fn sync_all(&self, peer: &str, operation: DataOperation, payload: SyncPayload) -> Result<(), DistroError> {
        let count = match &payload {
            SyncPayload::Data(data) => data.len(),
            SyncPayload::Deletes(keys) => keys.len(),
        };
        info!(peer, ?operation, count, "sync-all (no transport configured)");
        Ok(())
    }

    async fn verify(&self, peer: &str, checksums: HashMap<Key, Checksum>) -> Result<(), DistroError> {
        info!(peer, count = checksums.len(), "verify (no transport configured)");
        Ok(())
    }

    async fn pull(&self, peer: &str, keys: Vec<Key>) -> Result<HashMap<Key, Datum>, DistroError> {
        info!(peer, count = keys.len(), "pull (no transport configured)");
        Ok(HashMap::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ConfigLoader::new().load()?;
    info!(server_config = ?config.server, "loaded configuration");

    let self_id = std::env::var("NAMING_NODE_ID").unwrap_or_else(|_| "self".to_string());
    let ctx = Arc::new(ServerContext::build(
        config.server,
        self_id,
        vec!["self".to_string()],
        Arc::new(LoggingTransport),
    ));

    let dispatcher = Dispatcher::new(ctx);
    let handles = dispatcher.spawn();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    dispatcher.shutdown();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
