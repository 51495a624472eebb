//! ClientConnection: one accepted client socket from first byte to disposal.
//!
//! # Flow
//! ```text
//! receive until RequestBuffer reports a complete request
//!     → route (CONNECT authority or Host header)
//!     → BridgeFactory::create → handshake
//!     → CONNECT:   "200 Connection established", then relay both ways
//!     → otherwise: forward buffered request, then relay the response back
//!     → dispose
//! ```
//!
//! Parse and handshake failures get one synthesized 400 page. Transport
//! failures end the connection silently.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::connection::{ConnectionId, LiveGuard};
use crate::bridge::{Bridge, BridgeFactory, Duplex};
use crate::error::{ProxyError, ProxyResult};
use crate::http::request::CompleteRequest;
use crate::http::{response, RequestBuffer};
use crate::observability::metrics;

/// Per-module knobs every connection of that module shares.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Cap on buffered request bytes before the request is complete.
    pub max_request_bytes: usize,
    /// Size of each client read.
    pub read_chunk_size: usize,
    /// `Proxy-Agent` value of CONNECT replies.
    pub agent_name: Arc<str>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_request_bytes: 8 * 1024 * 1024,
            read_chunk_size: 40 * 1024,
            agent_name: Arc::from("bridge-proxy"),
        }
    }
}

pub struct ClientConnection<S> {
    id: ConnectionId,
    stream: Option<S>,
    request: RequestBuffer,
    bridge: Option<Box<dyn Bridge>>,
    factory: Arc<dyn BridgeFactory>,
    settings: ConnectionSettings,
    membership: Option<LiveGuard>,
    disposed: bool,
}

impl<S: Duplex> ClientConnection<S> {
    pub fn new(id: ConnectionId, stream: S, factory: Arc<dyn BridgeFactory>, settings: ConnectionSettings) -> Self {
        Self {
            id,
            stream: Some(stream),
            request: RequestBuffer::new(settings.max_request_bytes),
            bridge: None,
            factory,
            settings,
            membership: None,
            disposed: false,
        }
    }

    /// Tie this connection to its listener's live set; released on dispose.
    pub fn with_membership(mut self, guard: LiveGuard) -> Self {
        self.membership = Some(guard);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serve the connection to completion, or until its listener starts
    /// closing, then dispose it.
    pub async fn run(mut self) {
        let served = match self.membership.as_ref().map(LiveGuard::closing) {
            Some(closing) => tokio::select! {
                served = self.serve() => served,
                _ = closing => {
                    tracing::debug!(connection_id = %self.id, "Listener closing connection");
                    Ok(())
                }
            },
            None => self.serve().await,
        };
        if let Err(e) = served {
            tracing::debug!(connection_id = %self.id, kind = e.kind(), error = %e, "Connection ended");
        }
        self.dispose().await;
    }

    async fn serve(&mut self) -> ProxyResult<()> {
        let request = match self.receive_request().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e @ ProxyError::Parse(_)) => return self.reject(e).await,
            Err(e) => return Err(e),
        };

        let route = match request.head.route() {
            Ok(route) => route,
            Err(e) => return self.reject(e.into()).await,
        };
        tracing::debug!(
            connection_id = %self.id,
            method = %request.head.method,
            host = %route.host,
            port = route.port,
            bridge = self.factory.kind(),
            "Request routed"
        );

        let bridge = self.bridge.insert(self.factory.create(&self.id, route));
        if let Err(e) = bridge.handshake().await {
            return self.reject(e).await;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        if request.head.is_connect() {
            let reply = response::connection_established(&request.head.version, &self.settings.agent_name);
            stream.write_all(&reply).await?;
            stream.flush().await?;
            let early = request.trailing();
            if !early.is_empty() {
                bridge.write(early).await?;
            }
            let outcome = bridge.relay(stream).await;
            tracing::debug!(
                connection_id = %self.id,
                closed_by = ?outcome.closed_by,
                bytes = outcome.bytes,
                "Tunnel closed"
            );
        } else {
            // Nothing has reached the client yet, so a lost destination still gets its 400.
            if let Err(e) = bridge.write(&request.raw).await {
                return self.reject(e).await;
            }
            let bytes = bridge.relay_from(stream).await;
            tracing::debug!(connection_id = %self.id, bytes, "Response relayed");
        }
        Ok(())
    }

    /// Read until a complete request is buffered. `None` means the peer closed first.
    async fn receive_request(&mut self) -> ProxyResult<Option<CompleteRequest>> {
        let mut chunk = vec![0u8; self.settings.read_chunk_size.max(1)];
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            if let Some(request) = self.request.push(&chunk[..n])? {
                return Ok(Some(request));
            }
        }
    }

    /// Answer with the 400 page; the caller disposes afterwards.
    async fn reject(&mut self, error: ProxyError) -> ProxyResult<()> {
        let reason = match &error {
            ProxyError::Parse(e) => e.reason(),
            other => other.kind(),
        };
        tracing::info!(connection_id = %self.id, reason, error = %error, "Rejecting request");
        metrics::record_bad_request(reason);

        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(&response::bad_request()).await?;
            stream.flush().await?;
        }
        Ok(())
    }

    /// Close the client socket, dispose the bridge and leave the live set.
    ///
    /// Safe to call any number of times.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(mut stream) = self.stream.take() {
            // Already half-closed sockets reject shutdown; nothing to report.
            let _ = stream.shutdown().await;
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.dispose().await;
        }
        if let Some(mut membership) = self.membership.take() {
            membership.release();
        }
        tracing::trace!(connection_id = %self.id, "Connection disposed");
    }
}
