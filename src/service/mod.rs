//! Bridge-service side of the agent/bridge split.
//!
//! # Data Flow
//! ```text
//! RemoteBridge (agent) ── HTTP control protocol ──→ server.rs (axum router)
//!     → registry.rs (id → destination socket, idle eviction)
//!     → destination host:port
//! ```

pub mod registry;
pub mod server;

pub use registry::{RemoteConnection, RemoteConnectionRegistry};
pub use server::{BridgeService, ServiceState};
