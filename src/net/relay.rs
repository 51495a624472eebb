//! Bidirectional byte relay between two duplex streams.
//!
//! # Responsibilities
//! - Copy client → destination and destination → client concurrently
//! - Stop as soon as either half completes (EOF or error)
//! - Never surface I/O errors past this boundary

use tokio::io::{self, AsyncRead, AsyncWrite};

use crate::observability::metrics;

/// The side whose half of the relay completed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Client,
    Destination,
}

/// How a relay finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Side that closed (or failed) first.
    pub closed_by: RelayEnd,
    /// Bytes moved by the completing half before it stopped.
    pub bytes: u64,
}

/// Relay bytes both ways until either side closes or errors.
///
/// The half still in flight when the other finishes is dropped; callers
/// dispose both streams right after.
pub async fn relay<C, D>(client: &mut C, destination: &mut D) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    D: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (mut client_read, mut client_write) = io::split(client);
    let (mut dest_read, mut dest_write) = io::split(destination);

    tokio::select! {
        res = io::copy(&mut client_read, &mut dest_write) => finish(RelayEnd::Client, res),
        res = io::copy(&mut dest_read, &mut client_write) => finish(RelayEnd::Destination, res),
    }
}

/// Copy one direction until the reader is exhausted.
pub async fn pump<R, W>(from: &mut R, to: &mut W) -> u64
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let outcome = finish(RelayEnd::Destination, io::copy(from, to).await);
    outcome.bytes
}

fn finish(closed_by: RelayEnd, res: io::Result<u64>) -> RelayOutcome {
    let direction = match closed_by {
        RelayEnd::Client => "upstream",
        RelayEnd::Destination => "downstream",
    };
    let bytes = match res {
        Ok(n) => n,
        Err(e) => {
            // Resets and broken pipes are the normal way tunnels end.
            tracing::debug!(direction, error = %e, "Relay half ended with error");
            0
        }
    };
    metrics::record_relayed_bytes(direction, bytes);
    RelayOutcome { closed_by, bytes }
}
