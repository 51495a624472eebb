//! Forward HTTP/HTTPS proxy with an optional agent/bridge split.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ net::listener ──▶ net::client (parse, route) ──▶ bridge::local ──▶ destination
//!                                                          └──▶ bridge::remote
//!                                                                   │ HTTP control protocol
//!                                                                   ▼
//!                                          service::server ──▶ service::registry ──▶ destination
//! ```
//!
//! A single process can run any mix of direct proxies, agents, bridge
//! services and port mappings; see [`config::ProxyConfig`].

// Core subsystems
pub mod bridge;
pub mod config;
pub mod http;
pub mod net;
pub mod service;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use lifecycle::runtime::ProxyRuntime;
pub use lifecycle::shutdown::Shutdown;
