//! The client-to-server collaborator seam (§6).
//!
//! Modeled as a trait rather than a hand-rolled HTTP client, mirroring
//! `naming-distro::Transport` on the server side: a production embedding
//! wires in whatever HTTP client it already uses.

use async_trait::async_trait;
use naming_types::ServiceInfo;

use crate::error::ClientError;
use crate::heartbeat::BeatInfo;

/// The server's acknowledgement of a client heartbeat: may carry an
/// updated beat period, which the heartbeat reactor adopts going forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatResponse {
    pub period_ms: u64,
}

#[async_trait]
pub trait ServerQueryClient: Send + Sync {
    /// `/instance/list?serviceName=...&clusters=...&udpPort=...&healthyOnly=...`
    async fn query_service(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &str,
        udp_port: u16,
        healthy_only: bool,
    ) -> Result<ServiceInfo, ClientError>;

    /// Fire-and-forget keep-alive for a push session without pulling a
    /// fresh authoritative copy (§4.G UpdateTask).
    async fn refresh_only(&self, service_name: &str, group_name: &str, clusters: &str) -> Result<(), ClientError>;

    /// `/instance/beat?serviceName=...&beat=<json>`
    async fn beat(
        &self,
        service_name: &str,
        group_name: &str,
        beat: &BeatInfo,
    ) -> Result<BeatResponse, ClientError>;
}
