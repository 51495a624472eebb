//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, live set)
//!     → handler.rs (per-module behaviour)
//!         → client.rs  (request recognition → bridge → relay)
//!         → portmap.rs (fixed destination → relay)
//!     → connection.rs (identity, live-set membership)
//!
//! Outbound:
//!     dial.rs (resolve + connect) → relay.rs (bidirectional copy)
//! ```
//!
//! # Design Decisions
//! - One task per connection; its state has a single writer
//! - First relay half to finish ends the connection
//! - Bounded accept via semaphore prevents resource exhaustion

pub mod client;
pub mod connection;
pub mod dial;
pub mod handler;
pub mod listener;
pub mod portmap;
pub mod relay;

pub use client::{ClientConnection, ConnectionSettings};
pub use connection::{ConnectionId, LiveGuard, LiveSet};
pub use handler::{ConnectionHandler, HttpProxyHandler};
pub use listener::{ListenerError, ListenerModule};
pub use portmap::PortMapHandler;
