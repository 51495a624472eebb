//! What a listener module does with each accepted socket.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;

use super::client::{ClientConnection, ConnectionSettings};
use super::connection::{ConnectionId, LiveGuard};
use crate::bridge::BridgeFactory;

/// Serves one accepted connection to completion.
///
/// The guard must be held until the connection is fully disposed.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, id: ConnectionId, stream: TcpStream, guard: LiveGuard);

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}

/// Forward proxy: parse the request, then bridge it.
pub struct HttpProxyHandler {
    factory: Arc<dyn BridgeFactory>,
    settings: ConnectionSettings,
}

impl HttpProxyHandler {
    pub fn new(factory: Arc<dyn BridgeFactory>, settings: ConnectionSettings) -> Self {
        Self { factory, settings }
    }
}

#[async_trait]
impl ConnectionHandler for HttpProxyHandler {
    async fn handle(&self, id: ConnectionId, stream: TcpStream, guard: LiveGuard) {
        ClientConnection::new(id, stream, self.factory.clone(), self.settings.clone())
            .with_membership(guard)
            .run()
            .await;
    }

    fn kind(&self) -> &'static str {
        self.factory.kind()
    }
}
