//! Destination bridges.
//!
//! # Data Flow
//! ```text
//! Route { host, port, keep_alive }
//!     → BridgeFactory::create (chosen per listener module)
//!         → local.rs   (direct TCP socket)
//!         → remote.rs  (control protocol against a bridge service)
//!     → handshake → write / relay / relay_from → dispose
//! ```
//!
//! # Design Decisions
//! - Connection code only sees `dyn Bridge`; the variant is injected by the
//!   listener module through its factory
//! - Relays never fail: completion is the signal to dispose
//! - `dispose` is idempotent

pub mod local;
pub mod protocol;
pub mod remote;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProxyResult;
use crate::http::Route;
use crate::net::connection::ConnectionId;
use crate::net::relay::RelayOutcome;

pub use local::{LocalBridge, LocalBridgeFactory};
pub use remote::{RemoteBridge, RemoteBridgeFactory};

/// A client-side byte stream a bridge can relay against.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized {}

/// Reaches one destination on behalf of one client connection.
#[async_trait]
pub trait Bridge: Send {
    /// Destination this bridge was created for.
    fn route(&self) -> &Route;

    /// Make the destination reachable.
    ///
    /// Fails with `DestinationUnreachable` on DNS, connect or remote-open failure.
    async fn handshake(&mut self) -> ProxyResult<()>;

    /// Send bytes toward the destination.
    async fn write(&mut self, bytes: &[u8]) -> ProxyResult<()>;

    /// Receive the next chunk from the destination; empty once it closed.
    async fn read(&mut self) -> ProxyResult<Bytes>;

    /// Relay both directions until either side closes.
    async fn relay(&mut self, client: &mut dyn Duplex) -> RelayOutcome;

    /// Relay destination → client until the destination closes.
    ///
    /// Returns the number of bytes delivered to the client.
    async fn relay_from(&mut self, client: &mut dyn Duplex) -> u64;

    /// Release the destination transport.
    async fn dispose(&mut self);
}

/// Builds the bridge variant a listener module is configured for.
pub trait BridgeFactory: Send + Sync {
    fn create(&self, id: &ConnectionId, route: Route) -> Box<dyn Bridge>;

    /// Short label for logs ("local" / "remote").
    fn kind(&self) -> &'static str;
}
