//! Error taxonomy for proxy connections.
//!
//! Every variant is caught at the connection boundary and turned into
//! disposal (plus a 400 page where the client can still be answered).
//! Only listener bind failures reach process startup, through
//! [`crate::net::listener::ListenerError`].

use std::time::Duration;
use thiserror::Error;

use crate::http::request::ParseError;

/// Unified error type for connection and bridge operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The buffered request could not be understood.
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    /// DNS failure, refused connect, or a rejected remote open.
    #[error("destination {host}:{port} unreachable: {reason}")]
    DestinationUnreachable {
        /// Destination host as requested by the client.
        host: String,
        /// Destination port.
        port: u16,
        /// Human readable cause.
        reason: String,
    },

    /// Send/receive failure on an established socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The bridge service no longer knows the connection identifier.
    #[error("connection {0} not found in bridge registry")]
    RegistryMiss(String),

    /// An explicit connect or control round-trip deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    /// Shorthand for [`ProxyError::DestinationUnreachable`].
    pub fn unreachable(host: &str, port: u16, reason: impl ToString) -> Self {
        ProxyError::DestinationUnreachable {
            host: host.to_string(),
            port,
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Parse(_) => "parse",
            ProxyError::DestinationUnreachable { .. } => "unreachable",
            ProxyError::Transport(_) => "transport",
            ProxyError::RegistryMiss(_) => "registry_miss",
            ProxyError::Timeout(_) => "timeout",
        }
    }
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
