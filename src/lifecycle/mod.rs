//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (runtime.rs):
//!     ProxyConfig → one module per declaration → bind each in order
//!
//! Shutdown:
//!     signals.rs (SIGINT/SIGTERM) → ProxyRuntime::stop
//!         → listener modules: stop accepting, dispose live connections
//!         → bridge services: clear registry, shutdown.rs trigger, drain
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners
//! - Ordered shutdown: reverse of startup
//! - Bridge-service drain has a deadline, then the server task is aborted

pub mod runtime;
pub mod shutdown;
pub mod signals;

pub use runtime::{ProxyModule, ProxyRuntime, RuntimeError};
