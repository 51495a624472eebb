//! Outbound TCP connections to proxy destinations.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::error::{ProxyError, ProxyResult};
use crate::resilience::timeouts::with_timeout;

/// Resolve `host` and connect to the first address that accepts.
///
/// DNS failures, refusals and an expired `timeout` all surface as
/// [`ProxyError::DestinationUnreachable`].
pub async fn dial(host: &str, port: u16, keep_alive: bool, timeout: Duration) -> ProxyResult<TcpStream> {
    match with_timeout(timeout, connect(host, port, keep_alive)).await {
        Err(ProxyError::Timeout(after)) => Err(ProxyError::unreachable(
            host,
            port,
            format!("connect timed out after {after:?}"),
        )),
        other => other,
    }
}

async fn connect(host: &str, port: u16, keep_alive: bool) -> ProxyResult<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| ProxyError::unreachable(host, port, format!("DNS lookup failed: {e}")))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match connect_addr(addr, keep_alive).await {
            Ok(stream) => {
                tracing::trace!(host, port, %addr, "Destination connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(host, port, %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(ProxyError::unreachable(
        host,
        port,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".to_string()),
    ))
}

async fn connect_addr(addr: SocketAddr, keep_alive: bool) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if keep_alive {
        socket.set_keepalive(true)?;
    }
    socket.connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = dial("127.0.0.1", port, true, Duration::from_secs(2)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn refused_connect_is_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = dial("127.0.0.1", port, false, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProxyError::DestinationUnreachable { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        let err = dial("does-not-exist.invalid", 80, false, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }
}
