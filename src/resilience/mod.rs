//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Destination connect / bridge-service round trip:
//!     → timeouts.rs (enforce deadline)
//!     → On expiry: ProxyError::Timeout, mapped to "unreachable" by callers
//! ```
//!
//! # Design Decisions
//! - No retries at any layer: a failed attempt needs a new client connection
//! - Timeouts never change success-path behavior

pub mod timeouts;
