//! Bridge-service HTTP endpoint.
//!
//! Mounts the control protocol (see [`crate::bridge::protocol`]) under every
//! configured prefix and serves it from a [`RemoteConnectionRegistry`].

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::registry::RemoteConnectionRegistry;
use crate::bridge::protocol::{self, ErrorBody, OpenRequest, OpenResponse, Operation};
use crate::error::ProxyError;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::listener::{resolve_bind_addr, ListenerError};

/// How long dispose waits for in-flight control requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state of the control handlers.
#[derive(Clone)]
pub struct ServiceState {
    pub registry: Arc<RemoteConnectionRegistry>,
    pub password: Option<Arc<str>>,
}

impl ServiceState {
    pub fn new(registry: Arc<RemoteConnectionRegistry>, password: Option<String>) -> Self {
        Self {
            registry,
            password: password.filter(|p| !p.is_empty()).map(Arc::from),
        }
    }
}

/// Build the control router. Duplicate prefixes (after normalization) mount once;
/// an empty list mounts [`protocol::DEFAULT_PREFIX`].
pub fn router(state: ServiceState, prefixes: &[String], body_limit: usize) -> Router {
    let mut prefixes: BTreeSet<String> = prefixes.iter().map(|p| protocol::normalize_prefix(p)).collect();
    if prefixes.is_empty() {
        prefixes.insert(protocol::DEFAULT_PREFIX.to_string());
    }

    let mut router = Router::new();
    for prefix in &prefixes {
        router = router
            .route(&protocol::route_path(prefix, Operation::Open), post(open_handler))
            .route(&protocol::route_path(prefix, Operation::Write), post(write_handler))
            .route(&protocol::route_path(prefix, Operation::Read), post(read_handler))
            .route(&protocol::route_path(prefix, Operation::Close), post(close_handler));
    }

    router
        .route_layer(middleware::from_fn_with_state(state.clone(), bridge_auth))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn bridge_auth(
    State(state): State<ServiceState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(password) = &state.password else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if auth_header == Some(protocol::bearer(password).as_str()) {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated bridge request");
    Err(StatusCode::UNAUTHORIZED)
}

fn error_response(error: ProxyError) -> Response {
    let status = match &error {
        ProxyError::RegistryMiss(_) => StatusCode::NOT_FOUND,
        ProxyError::Parse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorBody { error: error.to_string() })).into_response()
}

async fn open_handler(State(state): State<ServiceState>, Json(open): Json<OpenRequest>) -> Response {
    match state.registry.open(&open.id, &open.host, open.port).await {
        Ok(_) => (StatusCode::OK, Json(OpenResponse { id: open.id })).into_response(),
        Err(e) => {
            tracing::info!(connection_id = %open.id, host = %open.host, port = open.port, error = %e, "Bridge open failed");
            error_response(e)
        }
    }
}

async fn write_handler(State(state): State<ServiceState>, Path(id): Path<String>, body: Bytes) -> Response {
    match state.registry.relay_to(&id, &body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            if matches!(e, ProxyError::Transport(_)) {
                state.registry.remove(&id);
            }
            error_response(e)
        }
    }
}

async fn read_handler(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    match state.registry.relay_from(&id).await {
        Ok(chunk) => {
            if chunk.is_empty() {
                // Destination closed; nothing more will ever be read.
                state.registry.remove(&id);
            }
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], chunk).into_response()
        }
        Err(e) => {
            if matches!(e, ProxyError::Transport(_)) {
                state.registry.remove(&id);
            }
            error_response(e)
        }
    }
}

async fn close_handler(State(state): State<ServiceState>, Path(id): Path<String>) -> StatusCode {
    state.registry.remove(&id);
    StatusCode::NO_CONTENT
}

/// A bridge service module: listener, router and its registry.
pub struct BridgeService {
    name: Arc<str>,
    host: String,
    port: u16,
    prefixes: Vec<String>,
    body_limit: usize,
    state: ServiceState,
    shutdown: Shutdown,
    /// Bound but not yet serving.
    bound: Option<TcpListener>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl BridgeService {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        prefixes: Vec<String>,
        body_limit: usize,
        state: ServiceState,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            host: host.into(),
            port,
            prefixes,
            body_limit,
            state,
            shutdown: Shutdown::new(),
            bound: None,
            task: None,
            local_addr: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<RemoteConnectionRegistry> {
        &self.state.registry
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listening socket without serving yet. Idempotent.
    pub async fn bind(&mut self) -> Result<SocketAddr, ListenerError> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let addr = resolve_bind_addr(&self.host, self.port).await?;
        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(module = %self.name, address = %local_addr, "Bridge service bound");

        self.bound = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Bind if needed, then serve. Calling it on a running service is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        let local_addr = self.bind().await?;
        let Some(listener) = self.bound.take() else {
            return Ok(local_addr);
        };

        let app = router(self.state.clone(), &self.prefixes, self.body_limit);
        let mut shutdown_rx = self.shutdown.subscribe();
        let name = self.name.clone();

        tracing::info!(
            module = %name,
            address = %local_addr,
            prefixes = ?self.prefixes,
            "Bridge service listening"
        );

        self.task = Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(module = %name, error = %e, "Bridge service failed");
            }
            tracing::info!(module = %name, "Bridge service stopped");
        }));
        Ok(local_addr)
    }

    /// Close every registry entry, then stop serving.
    pub async fn dispose(&mut self) {
        // Clearing first wakes long-poll reads so graceful shutdown can finish.
        self.state.registry.clear();
        self.shutdown.trigger();

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(module = %self.name, "Bridge service did not drain in time; aborting");
                task.abort();
            }
        }
        self.bound = None;
        self.local_addr = None;
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
