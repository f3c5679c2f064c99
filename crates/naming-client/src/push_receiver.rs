//! Server→client push receiver (§4.H): a long-lived UDP socket whose
//! lifetime is tied to the reactor that owns it.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::host_reactor::HostReactor;
use crate::server_query::ServerQueryClient;

const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    kind: String,
    data: Option<String>,
    #[serde(rename = "lastRefTime")]
    last_ref_time: u64,
}

#[derive(Debug, Serialize)]
struct PushAck {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "lastRefTime")]
    last_ref_time: u64,
}

pub struct PushReceiver {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl PushReceiver {
    /// Binds a UDP socket on an ephemeral port and starts receiving pushes
    /// for `reactor`. The returned port is handed to the server on every
    /// query so pushes are targeted at this client (§4.G).
    pub async fn bind<C: ServerQueryClient + 'static>(reactor: Arc<HostReactor<C>>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let local_addr = socket.local_addr()?;
        let task = tokio::spawn(receive_loop(socket, reactor));
        Ok(Self { local_addr, task })
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for PushReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive_loop<C: ServerQueryClient + 'static>(socket: UdpSocket, reactor: Arc<HostReactor<C>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "push receiver socket error");
                continue;
            }
        };

        let frame: PushFrame = match serde_json::from_slice(&buf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed push frame");
                continue;
            }
        };

        if frame.kind == "dom" {
            if let Some(json) = &frame.data {
                if let Err(err) = reactor.process_service_json(json).await {
                    warn!(error = %err, peer = %peer, "dropping malformed push payload");
                }
            }
        }

        let ack = PushAck {
            kind: "push-ack",
            last_ref_time: frame.last_ref_time,
        };
        if let Ok(body) = serde_json::to_vec(&ack) {
            if let Err(err) = socket.send_to(&body, peer).await {
                warn!(error = %err, peer = %peer, "failed to ack push frame");
            }
        }
    }
}
