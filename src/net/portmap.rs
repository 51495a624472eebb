//! Port mapping: every accepted socket is piped to one fixed destination.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::connection::{ConnectionId, LiveGuard};
use super::dial::dial;
use super::handler::ConnectionHandler;
use super::relay;

#[derive(Debug, Clone)]
pub struct PortMapHandler {
    target_host: String,
    target_port: u16,
    connect_timeout: Duration,
}

impl PortMapHandler {
    pub fn new(target_host: impl Into<String>, target_port: u16, connect_timeout: Duration) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            connect_timeout,
        }
    }
}

impl PortMapHandler {
    async fn pipe(&self, id: ConnectionId, stream: &mut TcpStream) {
        match dial(&self.target_host, self.target_port, true, self.connect_timeout).await {
            Ok(mut destination) => {
                let outcome = relay::relay(stream, &mut destination).await;
                tracing::debug!(
                    connection_id = %id,
                    closed_by = ?outcome.closed_by,
                    bytes = outcome.bytes,
                    "Mapped connection closed"
                );
                let _ = destination.shutdown().await;
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Port map target unreachable");
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for PortMapHandler {
    async fn handle(&self, id: ConnectionId, mut stream: TcpStream, mut guard: LiveGuard) {
        let closing = guard.closing();
        tokio::select! {
            _ = self.pipe(id, &mut stream) => {}
            _ = closing => {
                tracing::debug!(connection_id = %id, "Listener closing mapped connection");
            }
        }
        let _ = stream.shutdown().await;
        guard.release();
    }

    fn kind(&self) -> &'static str {
        "port_map"
    }
}
