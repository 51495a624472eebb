//! ListenerModule: a bound listening socket plus the connections it accepted.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections, enforcing max_connections via semaphore
//! - Track every live connection so dispose can tear them all down
//! - Log accept errors and keep accepting

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::connection::{ConnectionId, LiveSet};
use super::handler::ConnectionHandler;
use crate::observability::metrics;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long dispose waits for live connections to dispose themselves.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to resolve or bind the listen address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Resolve a configured listen host and port. An empty host means all interfaces.
pub async fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr, ListenerError> {
    let host = if host.trim().is_empty() { "0.0.0.0" } else { host.trim() };
    lookup_host((host, port))
        .await
        .map_err(ListenerError::Bind)?
        .next()
        .ok_or_else(|| {
            ListenerError::Bind(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{host} did not resolve to any address"),
            ))
        })
}

/// A named listener whose accepted sockets are served by one handler.
pub struct ListenerModule {
    name: Arc<str>,
    host: String,
    port: u16,
    handler: Arc<dyn ConnectionHandler>,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    live: LiveSet,
    close_grace: Duration,
    /// Bound but not yet accepting.
    bound: Option<TcpListener>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ListenerModule {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        max_connections: usize,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            name: Arc::from(name.into()),
            host: host.into(),
            port,
            handler,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            live: LiveSet::new(),
            close_grace: CLOSE_GRACE,
            bound: None,
            accept_task: None,
            local_addr: None,
        }
    }

    /// Override how long dispose waits before aborting live connections.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn live_connections(&self) -> usize {
        self.live.len()
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Bind the listening socket without accepting yet. Idempotent.
    pub async fn bind(&mut self) -> Result<SocketAddr, ListenerError> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let addr = resolve_bind_addr(&self.host, self.port).await?;
        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            module = %self.name,
            handler = self.handler.kind(),
            address = %local_addr,
            max_connections = self.max_connections,
            "Listener bound"
        );
        self.bound = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Bind if needed, then start accepting. Calling it on a running module is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        let addr = self.bind().await?;
        if let Some(listener) = self.bound.take() {
            tracing::debug!(module = %self.name, address = %addr, "Listener accepting");
            self.accept_task = Some(tokio::spawn(accept_loop(
                self.name.clone(),
                listener,
                self.connection_limit.clone(),
                self.live.clone(),
                self.handler.clone(),
            )));
        }
        Ok(addr)
    }

    /// Close the listening socket and bind a fresh one. Live connections are kept.
    pub async fn restart(&mut self) -> Result<SocketAddr, ListenerError> {
        self.stop_accepting().await;
        tracing::info!(module = %self.name, "Listener restarting");
        self.start().await
    }

    /// Stop accepting, then dispose every live connection.
    ///
    /// Connections get the close grace to dispose themselves; the rest are aborted.
    pub async fn dispose(&mut self) {
        self.stop_accepting().await;

        let count = self.live.len();
        let aborted = self.live.close_all(self.close_grace).await;
        tracing::info!(module = %self.name, connections = count, aborted, "Listener disposed");
    }

    async fn stop_accepting(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            // Awaiting guarantees the listening socket is closed before returning.
            let _ = task.await;
        }
        self.bound = None;
        self.local_addr = None;
    }
}

impl Drop for ListenerModule {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    name: Arc<str>,
    listener: TcpListener,
    limit: Arc<Semaphore>,
    live: LiveSet,
    handler: Arc<dyn ConnectionHandler>,
) {
    loop {
        // Acquire permit first (backpressure)
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };

        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(module = %name, error = %ListenerError::Accept(e), "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let id = ConnectionId::new();
        metrics::record_connection_accepted(&name);
        tracing::debug!(
            module = %name,
            connection_id = %id,
            peer_addr = %peer_addr,
            available_permits = limit.available_permits(),
            "Connection accepted"
        );

        let handler = handler.clone();
        live.spawn(id, move |guard| async move {
            let _permit = permit;
            handler.handle(id, stream, guard).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::LiveGuard;
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn hold(stream: &mut TcpStream) {
        let mut buf = [0u8; 64];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    }

    /// Holds each connection open until the client hangs up or the listener closes.
    struct HoldHandler;

    #[async_trait]
    impl ConnectionHandler for HoldHandler {
        async fn handle(&self, _id: ConnectionId, mut stream: TcpStream, guard: LiveGuard) {
            let closing = guard.closing();
            tokio::select! {
                _ = hold(&mut stream) => {}
                _ = closing => {}
            }
        }

        fn kind(&self) -> &'static str {
            "hold"
        }
    }

    /// Holds each connection open until the client hangs up, ignoring the listener.
    struct StubbornHandler;

    #[async_trait]
    impl ConnectionHandler for StubbornHandler {
        async fn handle(&self, _id: ConnectionId, mut stream: TcpStream, _guard: LiveGuard) {
            hold(&mut stream).await;
        }

        fn kind(&self) -> &'static str {
            "stubborn"
        }
    }

    fn module(port: u16) -> ListenerModule {
        ListenerModule::new("test", "127.0.0.1", port, 16, Arc::new(HoldHandler))
    }

    async fn wait_for_live(module: &ListenerModule, expected: usize) {
        for _ in 0..100 {
            if module.live_connections() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} live connections, found {}", module.live_connections());
    }

    #[tokio::test]
    async fn dispose_drains_live_connections() {
        let mut module = module(0);
        let addr = module.start().await.unwrap();

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&module, 2).await;

        module.dispose().await;
        assert_eq!(module.live_connections(), 0);
        assert!(!module.is_running());

        let mut buf = [0u8; 1];
        assert_eq!(a.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(b.read(&mut buf).await.unwrap_or(0), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn dispose_aborts_connections_that_ignore_close() {
        let mut module = ListenerModule::new("test", "127.0.0.1", 0, 16, Arc::new(StubbornHandler))
            .with_close_grace(Duration::from_millis(50));
        let addr = module.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&module, 1).await;

        module.dispose().await;
        assert_eq!(module.live_connections(), 0);
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("aborted connection was not closed");
        assert_eq!(read.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn bind_defers_accepting_until_start() {
        let mut module = module(0);
        let addr = module.bind().await.unwrap();
        assert_eq!(module.local_addr(), Some(addr));
        assert!(!module.is_running());

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(module.live_connections(), 0);

        assert_eq!(module.start().await.unwrap(), addr);
        assert!(module.is_running());
        wait_for_live(&module, 1).await;

        module.dispose().await;
    }

    #[tokio::test]
    async fn closed_connection_leaves_live_set() {
        let mut module = module(0);
        let addr = module.start().await.unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&module, 1).await;
        drop(client);
        wait_for_live(&module, 0).await;

        module.dispose().await;
    }

    #[tokio::test]
    async fn restart_rebinds_and_keeps_accepting() {
        let port = {
            let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
            free.local_addr().unwrap().port()
        };
        let mut module = module(port);
        module.start().await.unwrap();

        let addr = module.restart().await.unwrap();
        assert_eq!(addr.port(), port);
        let _client = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&module, 1).await;

        module.dispose().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut module = module(port);
        let err = module.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
        assert!(err.to_string().starts_with("Failed to bind"));
    }

    #[tokio::test]
    async fn empty_host_binds_all_interfaces() {
        let addr = resolve_bind_addr("", 8080).await.unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 8080);
    }
}
