//! HTTP recognition subsystem.
//!
//! # Data Flow
//! ```text
//! raw client bytes
//!     → request.rs (buffer until complete, parse request line + headers)
//!     → Route { host, port, keep_alive }
//!     → [net::client picks and drives a bridge]
//!     → response.rs (CONNECT acknowledgement or 400 page)
//! ```
//!
//! # Design Decisions
//! - No HTTP library on the client-facing side: the proxy only needs the
//!   routing tuple and forwards the original bytes untouched
//! - Parsing is lenient; only a missing destination is fatal

pub mod request;
pub mod response;

pub use request::{CompleteRequest, ParseError, RequestBuffer, RequestHead, Route};
