//! Agent → bridge service → destination, end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;

use bridge_proxy::bridge::protocol::{OpenRequest, OpenResponse};
use bridge_proxy::config::schema::HttpAgentModuleConfig;
use bridge_proxy::service::{BridgeService, RemoteConnectionRegistry, ServiceState};
use bridge_proxy::{ProxyConfig, ProxyRuntime};

mod common;

const PASSWORD: &str = "s3cret";

async fn start_bridge_service() -> (BridgeService, Arc<RemoteConnectionRegistry>, SocketAddr) {
    let registry = Arc::new(RemoteConnectionRegistry::new(
        100,
        Duration::from_secs(600),
        Duration::from_secs(2),
        4096,
    ));
    let mut service = BridgeService::new(
        "BridgeService-test",
        "127.0.0.1",
        0,
        vec!["/bridge".into()],
        1024 * 1024,
        ServiceState::new(registry.clone(), Some(PASSWORD.into())),
    );
    let addr = service.start().await.unwrap();
    (service, registry, addr)
}

async fn start_agent(bridge: SocketAddr, password: &str) -> (ProxyRuntime, SocketAddr) {
    let mut config = ProxyConfig::default();
    config.timeouts.bridge_request_secs = 5;
    config.http_agent = vec![HttpAgentModuleConfig {
        name: "test".into(),
        host: "127.0.0.1".into(),
        port: 0,
        max_connections: 64,
        bridge_url: format!("http://{bridge}"),
        password: password.into(),
        prefix: "/bridge".into(),
    }];
    let mut runtime = ProxyRuntime::from_config(&config);
    runtime.start().await.unwrap();
    let addr = runtime.local_addr("HttpAgent-test").unwrap();
    (runtime, addr)
}

async fn wait_until_empty(registry: &RemoteConnectionRegistry) {
    for _ in 0..100 {
        if registry.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry still holds {} entries", registry.len());
}

#[tokio::test]
async fn plain_get_through_bridge() {
    let (backend, mut requests) = common::start_mock_backend("bridged body").await;
    let (mut service, registry, bridge) = start_bridge_service().await;
    let (mut agent, proxy) = start_agent(bridge, PASSWORD).await;

    let request = format!("GET http://{backend}/ HTTP/1.1\r\nHost: {backend}\r\n\r\n");
    let response = common::raw_exchange(proxy, request.as_bytes()).await;
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("bridged body"));
    assert_eq!(requests.recv().await.unwrap(), request.into_bytes());
    wait_until_empty(&registry).await;

    agent.stop().await;
    service.dispose().await;
}

#[tokio::test]
async fn connect_tunnel_through_bridge() {
    let echo = common::start_echo_server().await;
    let (mut service, registry, bridge) = start_bridge_service().await;
    let (mut agent, proxy) = start_agent(bridge, PASSWORD).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let head = common::read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection established\r\n"));
    assert_eq!(registry.len(), 1);

    for message in [&b"over the bridge"[..], b"and back again"] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .expect("echo did not arrive")
            .unwrap();
        assert_eq!(echoed, message);
    }

    drop(client);
    wait_until_empty(&registry).await;

    agent.stop().await;
    service.dispose().await;
}

#[tokio::test]
async fn wrong_password_is_rejected_with_bad_request() {
    let (backend, _requests) = common::start_mock_backend("never").await;
    let (mut service, registry, bridge) = start_bridge_service().await;
    let (mut agent, proxy) = start_agent(bridge, "wrong").await;

    let request = format!("GET http://{backend}/ HTTP/1.1\r\nHost: {backend}\r\n\r\n");
    let response = common::raw_exchange(proxy, request.as_bytes()).await;
    assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(registry.is_empty());

    agent.stop().await;
    service.dispose().await;
}

#[tokio::test]
async fn destination_unreachable_from_bridge_is_bad_request() {
    let port = common::closed_port().await;
    let (mut service, registry, bridge) = start_bridge_service().await;
    let (mut agent, proxy) = start_agent(bridge, PASSWORD).await;

    let request = format!("CONNECT 127.0.0.1:{port} HTTP/1.1\r\n\r\n");
    let response = common::raw_exchange(proxy, request.as_bytes()).await;
    assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(registry.is_empty());

    agent.stop().await;
    service.dispose().await;
}

#[tokio::test]
async fn bridge_service_unreachable_is_bad_request() {
    let port = common::closed_port().await;
    let bridge: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let (mut agent, proxy) = start_agent(bridge, PASSWORD).await;

    let response = common::raw_exchange(proxy, b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
    assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400 Bad Request\r\n"));

    agent.stop().await;
}

/// A bridge service that acknowledges every open but has lost the entry by the first write.
async fn start_forgetful_service() -> SocketAddr {
    let app = Router::new()
        .route(
            "/bridge/open",
            post(|Json(open): Json<OpenRequest>| async move { Json(OpenResponse { id: open.id }) }),
        )
        .route("/bridge/write/{id}", post(|| async { StatusCode::NOT_FOUND }))
        .route("/bridge/read/{id}", post(|| async { StatusCode::NOT_FOUND }))
        .route("/bridge/close/{id}", post(|| async { StatusCode::NO_CONTENT }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn entry_lost_after_open_is_bad_request() {
    let bridge = start_forgetful_service().await;
    let (mut agent, proxy) = start_agent(bridge, PASSWORD).await;

    let response = common::raw_exchange(proxy, b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
    assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400 Bad Request\r\n"));

    agent.stop().await;
}
