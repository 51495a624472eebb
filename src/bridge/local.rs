//! Direct TCP bridge.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Bridge, BridgeFactory, Duplex};
use crate::error::{ProxyError, ProxyResult};
use crate::http::Route;
use crate::net::connection::ConnectionId;
use crate::net::dial::dial;
use crate::net::relay::{self, RelayOutcome};

/// Creates [`LocalBridge`]s.
#[derive(Debug, Clone)]
pub struct LocalBridgeFactory {
    connect_timeout: Duration,
    read_chunk_size: usize,
}

impl LocalBridgeFactory {
    pub fn new(connect_timeout: Duration, read_chunk_size: usize) -> Self {
        Self {
            connect_timeout,
            read_chunk_size,
        }
    }
}

impl BridgeFactory for LocalBridgeFactory {
    fn create(&self, _id: &ConnectionId, route: Route) -> Box<dyn Bridge> {
        Box::new(LocalBridge::new(route, self.connect_timeout, self.read_chunk_size))
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Opens the destination socket itself and then acts as a plain pipe.
#[derive(Debug)]
pub struct LocalBridge {
    route: Route,
    connect_timeout: Duration,
    read_chunk_size: usize,
    stream: Option<TcpStream>,
}

impl LocalBridge {
    pub fn new(route: Route, connect_timeout: Duration, read_chunk_size: usize) -> Self {
        Self {
            route,
            connect_timeout,
            read_chunk_size,
            stream: None,
        }
    }

    fn stream(&mut self) -> ProxyResult<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            ProxyError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "bridge not connected",
            ))
        })
    }
}

#[async_trait]
impl Bridge for LocalBridge {
    fn route(&self) -> &Route {
        &self.route
    }

    async fn handshake(&mut self) -> ProxyResult<()> {
        let stream = dial(
            &self.route.host,
            self.route.port,
            self.route.keep_alive,
            self.connect_timeout,
        )
        .await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn read(&mut self) -> ProxyResult<Bytes> {
        let mut buf = vec![0u8; self.read_chunk_size];
        let n = self.stream()?.read(&mut buf).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn relay(&mut self, client: &mut dyn Duplex) -> RelayOutcome {
        match self.stream.as_mut() {
            Some(stream) => relay::relay(client, stream).await,
            None => RelayOutcome {
                closed_by: relay::RelayEnd::Destination,
                bytes: 0,
            },
        }
    }

    async fn relay_from(&mut self, client: &mut dyn Duplex) -> u64 {
        match self.stream.as_mut() {
            Some(stream) => relay::pump(stream, client).await,
            None => 0,
        }
    }

    async fn dispose(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; shutdown errors carry no information.
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn route(port: u16) -> Route {
        Route {
            host: "127.0.0.1".into(),
            port,
            keep_alive: false,
        }
    }

    #[tokio::test]
    async fn write_then_read_through_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut bridge = LocalBridge::new(route(port), Duration::from_secs(2), 1024);
        bridge.handshake().await.unwrap();
        bridge.write(b"hello").await.unwrap();
        let echoed = bridge.read().await.unwrap();
        assert_eq!(&echoed[..], b"hello");

        bridge.dispose().await;
        bridge.dispose().await;
        assert!(bridge.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn handshake_to_closed_port_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut bridge = LocalBridge::new(route(port), Duration::from_secs(2), 1024);
        let err = bridge.handshake().await.unwrap_err();
        assert!(matches!(err, ProxyError::DestinationUnreachable { .. }));
    }
}
