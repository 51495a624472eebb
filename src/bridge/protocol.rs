//! Agent ↔ bridge-service control protocol.
//!
//! Plain HTTP/1.1 POSTs under a configurable prefix:
//!
//! ```text
//! {prefix}/open          JSON OpenRequest  → 200 OpenResponse | 502 ErrorBody
//! {prefix}/write/{id}    raw bytes         → 204 | 404 | 502
//! {prefix}/read/{id}                       → 200 chunk (empty = closed) | 404 | 502
//! {prefix}/close/{id}                      → 204
//! ```
//!
//! Requests carry `Authorization: Bearer <password>` when the service has
//! a password configured.

use serde::{Deserialize, Serialize};

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "/bridge";

/// Control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Write,
    Read,
    Close,
}

impl Operation {
    pub fn segment(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Close => "close",
        }
    }
}

/// Body of an open request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Connection identifier chosen by the agent.
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Successful open acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenResponse {
    pub id: String,
}

/// Error payload for non-2xx replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Canonical form of a route prefix: leading `/`, no trailing `/`,
/// and the empty string for the root.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Router path for `op` under `prefix`, with an `{id}` capture where needed.
pub fn route_path(prefix: &str, op: Operation) -> String {
    let prefix = normalize_prefix(prefix);
    match op {
        Operation::Open => format!("{prefix}/open"),
        _ => format!("{prefix}/{}/{{id}}", op.segment()),
    }
}

/// Concrete request path for `op` on connection `id`.
pub fn request_path(prefix: &str, op: Operation, id: &str) -> String {
    let prefix = normalize_prefix(prefix);
    match op {
        Operation::Open => format!("{prefix}/open"),
        _ => format!("{prefix}/{}/{id}", op.segment()),
    }
}

/// `Authorization` header value for `password`.
pub fn bearer(password: &str) -> String {
    format!("Bearer {password}")
}
