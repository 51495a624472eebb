//! Bridge that egresses through a remote bridge service.
//!
//! # Responsibilities
//! - Ask the service to open the destination under this connection's id
//! - Translate writes and reads into control round trips
//! - Close the remote entry when the connection goes away
//!
//! # Design Decisions
//! - Reads are long polls without a deadline; open/write/close are bounded
//!   by the configured control timeout
//! - A 404 from the service means the entry is gone (evicted or closed)
//!   and is never retried

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use bytes::Bytes;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{self, ErrorBody, OpenRequest, Operation};
use super::{Bridge, BridgeFactory, Duplex};
use crate::error::{ProxyError, ProxyResult};
use crate::http::Route;
use crate::net::connection::ConnectionId;
use crate::net::relay::{RelayEnd, RelayOutcome};
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;

/// HTTP client for one bridge service endpoint.
#[derive(Clone)]
struct ControlClient {
    client: Client<HttpConnector, Body>,
    base_url: Arc<str>,
    prefix: Arc<str>,
    password: Option<Arc<str>>,
    request_timeout: Duration,
}

impl ControlClient {
    async fn post(&self, op: Operation, id: &str, body: Body, json: bool) -> ProxyResult<(StatusCode, Bytes)> {
        let uri = format!("{}{}", self.base_url, protocol::request_path(&self.prefix, op, id));
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if json {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if let Some(password) = &self.password {
            builder = builder.header(header::AUTHORIZATION, protocol::bearer(password));
        }
        let request = builder.body(body).map_err(control_error)?;

        let response: hyper::Response<hyper::body::Incoming> =
            self.client.request(request).await.map_err(control_error)?;
        let status = response.status();
        let body = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .map_err(control_error)?;
        Ok((status, body))
    }

    async fn close(&self, id: &str) {
        let res = with_timeout(self.request_timeout, self.post(Operation::Close, id, Body::empty(), false)).await;
        if let Err(e) = res {
            tracing::debug!(connection_id = %id, error = %e, "Remote close failed");
        }
    }
}

fn control_error(e: impl std::fmt::Display) -> ProxyError {
    ProxyError::Transport(std::io::Error::other(format!("bridge service: {e}")))
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("bridge service replied {status}"))
}

/// Creates [`RemoteBridge`]s that all talk to one bridge service.
#[derive(Clone)]
pub struct RemoteBridgeFactory {
    control: ControlClient,
    read_chunk_size: usize,
}

impl RemoteBridgeFactory {
    /// `bridge_url` is the service origin (e.g. `http://10.0.0.5:9000`);
    /// `prefix` the route prefix it mounts the protocol under.
    pub fn new(
        bridge_url: &str,
        prefix: &str,
        password: Option<String>,
        request_timeout: Duration,
        read_chunk_size: usize,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            control: ControlClient {
                client,
                base_url: Arc::from(bridge_url.trim_end_matches('/')),
                prefix: Arc::from(protocol::normalize_prefix(prefix)),
                password: password.filter(|p| !p.is_empty()).map(Arc::from),
                request_timeout,
            },
            read_chunk_size,
        }
    }
}

impl BridgeFactory for RemoteBridgeFactory {
    fn create(&self, id: &ConnectionId, route: Route) -> Box<dyn Bridge> {
        Box::new(RemoteBridge {
            id: id.to_string(),
            route,
            control: self.control.clone(),
            read_chunk_size: self.read_chunk_size,
            remote_entry: false,
            closed: false,
        })
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}

/// Destination socket held by a bridge service, addressed by connection id.
pub struct RemoteBridge {
    id: String,
    route: Route,
    control: ControlClient,
    read_chunk_size: usize,
    /// The service may hold an entry for this id; cleared only by a clean rejection.
    remote_entry: bool,
    closed: bool,
}

impl RemoteBridge {
    fn check(&self, status: StatusCode, body: &[u8]) -> ProxyResult<()> {
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            Err(ProxyError::RegistryMiss(self.id.clone()))
        } else {
            Err(ProxyError::Transport(std::io::Error::other(error_message(status, body))))
        }
    }

    async fn send(&self, bytes: &[u8]) -> ProxyResult<()> {
        let body = Body::from(bytes.to_vec());
        let (status, reply) = with_timeout(
            self.control.request_timeout,
            self.control.post(Operation::Write, &self.id, body, false),
        )
        .await?;
        self.check(status, &reply)
    }

    async fn fetch(&self) -> ProxyResult<Bytes> {
        let (status, chunk) = self
            .control
            .post(Operation::Read, &self.id, Body::empty(), false)
            .await?;
        self.check(status, &chunk)?;
        Ok(chunk)
    }

    /// Deliver destination chunks to `client` until the destination closes.
    async fn pump_to<W>(&self, client: &mut W) -> u64
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut total = 0u64;
        loop {
            match self.fetch().await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => {
                    if client.write_all(&chunk).await.is_err() {
                        break;
                    }
                    total += chunk.len() as u64;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Remote read ended");
                    break;
                }
            }
        }
        let _ = client.flush().await;
        metrics::record_relayed_bytes("downstream", total);
        total
    }
}

#[async_trait]
impl Bridge for RemoteBridge {
    fn route(&self) -> &Route {
        &self.route
    }

    async fn handshake(&mut self) -> ProxyResult<()> {
        let host = self.route.host.clone();
        let port = self.route.port;
        let open = OpenRequest {
            id: self.id.clone(),
            host: host.clone(),
            port,
        };
        let payload = serde_json::to_vec(&open).map_err(|e| ProxyError::unreachable(&host, port, e))?;

        // An open that times out may still have been applied by the service.
        self.remote_entry = true;
        let reply = with_timeout(
            self.control.request_timeout,
            self.control.post(Operation::Open, &self.id, Body::from(payload), true),
        )
        .await;

        match reply {
            Ok((status, _)) if status.is_success() => {
                tracing::debug!(connection_id = %self.id, host = %host, port, "Remote destination opened");
                Ok(())
            }
            Ok((status, body)) => {
                self.remote_entry = false;
                Err(ProxyError::unreachable(&host, port, error_message(status, &body)))
            }
            Err(e) => Err(ProxyError::unreachable(&host, port, e)),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        self.send(bytes).await
    }

    async fn read(&mut self) -> ProxyResult<Bytes> {
        self.fetch().await
    }

    async fn relay(&mut self, client: &mut dyn Duplex) -> RelayOutcome {
        let this = &*self;
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let upstream = async {
            let mut buf = vec![0u8; this.read_chunk_size];
            let mut total = 0u64;
            loop {
                let n = match client_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if let Err(e) = this.send(&buf[..n]).await {
                    tracing::debug!(connection_id = %this.id, error = %e, "Remote write ended");
                    break;
                }
                total += n as u64;
            }
            metrics::record_relayed_bytes("upstream", total);
            total
        };

        tokio::select! {
            bytes = upstream => RelayOutcome { closed_by: RelayEnd::Client, bytes },
            bytes = this.pump_to(&mut client_write) => RelayOutcome { closed_by: RelayEnd::Destination, bytes },
        }
    }

    async fn relay_from(&mut self, client: &mut dyn Duplex) -> u64 {
        self.pump_to(client).await
    }

    async fn dispose(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.remote_entry {
            self.control.close(&self.id).await;
        }
    }
}

impl Drop for RemoteBridge {
    fn drop(&mut self) {
        if !self.remote_entry || self.closed {
            return;
        }
        // Dropped without dispose (task aborted): release the remote entry in the background.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let control = self.control.clone();
            let id = std::mem::take(&mut self.id);
            handle.spawn(async move { control.close(&id).await });
        }
    }
}
