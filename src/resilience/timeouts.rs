//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound destination connects and bridge-service control round trips
//! - Cancel the wrapped operation cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Relays and long-poll reads are never wrapped; idle destinations are
//!   reclaimed by the registry sweep instead

use std::future::Future;
use std::time::Duration;

use crate::error::{ProxyError, ProxyResult};

/// Run `fut`, failing with [`ProxyError::Timeout`] once `duration` elapses.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> ProxyResult<T>
where
    F: Future<Output = ProxyResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(ProxyError::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let res = with_timeout(Duration::from_secs(1), async { Ok::<_, ProxyError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let res = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProxyError>(())
        })
        .await;
        assert!(matches!(res, Err(ProxyError::Timeout(d)) if d == Duration::from_millis(10)));
    }
}
