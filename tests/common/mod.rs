//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use bridge_proxy::config::schema::HttpModuleConfig;
use bridge_proxy::{ProxyConfig, ProxyRuntime};

/// Read from `socket` until the header terminator plus any declared body arrived.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
        let text = String::from_utf8_lossy(&received);
        if let Some(end) = text.find("\r\n\r\n") {
            let body_len = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.trim().eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if received.len() >= end + 4 + body_len {
                return received;
            }
        }
    }
}

/// Start a mock backend that answers every request with `body` and closes.
///
/// Each raw request it receives is sent on the returned channel.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, rx)
}

/// Start a TCP server that echoes every byte back until the peer closes.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn http_module(name: &str) -> HttpModuleConfig {
    HttpModuleConfig {
        name: name.into(),
        host: "127.0.0.1".into(),
        port: 0,
        max_connections: 64,
    }
}

/// Start a runtime with a single direct forward proxy and return it with its address.
pub async fn start_direct_proxy() -> (ProxyRuntime, SocketAddr) {
    let mut config = ProxyConfig::default();
    config.timeouts.connect_secs = 2;
    config.http = vec![http_module("test")];
    let mut runtime = ProxyRuntime::from_config(&config);
    runtime.start().await.unwrap();
    let addr = runtime.local_addr("Http-test").unwrap();
    (runtime, addr)
}

/// Send raw bytes to `proxy` and collect everything until it closes.
pub async fn raw_exchange(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// Read exactly the CONNECT acknowledgement head from `client`.
pub async fn read_head(client: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = client.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before response head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}
