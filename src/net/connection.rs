//! Connection identity and live-set membership.
//!
//! # Responsibilities
//! - Generate identifiers that stay unique across agents sharing a bridge service
//! - Track every in-flight connection task of a listener module
//! - Release membership exactly once, whichever way the task ends

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::observability::metrics;

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of live connection tasks owned by one listener module.
///
/// Cheap to clone; clones share the same set.
#[derive(Debug, Clone)]
pub struct LiveSet {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    entries: Mutex<HashMap<ConnectionId, AbortHandle>>,
    /// Raised while the owner is closing every connection.
    closing: watch::Sender<bool>,
    /// Woken whenever the set becomes empty.
    emptied: Notify,
}

impl Default for LiveSet {
    fn default() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                closing,
                emptied: Notify::new(),
            }),
        }
    }
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, AbortHandle>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the task for connection `id` and record it as live.
    ///
    /// The set is never locked while the future is built or spawned, since
    /// either may drop the guard. The task body is held back until its abort
    /// handle is recorded, so a task that finishes immediately still finds
    /// its own entry to remove.
    pub fn spawn<F, Fut>(&self, id: ConnectionId, make: F)
    where
        F: FnOnce(LiveGuard) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = LiveGuard {
            id,
            set: self.clone(),
            closing: self.inner.closing.subscribe(),
            released: false,
        };
        let task = make(guard);
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if ready_rx.await.is_ok() {
                task.await;
            }
        });

        self.entries().insert(id, handle.abort_handle());
        if ready_tx.send(()).is_err() {
            // Task was dropped before it could run.
            self.remove(&id);
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Empty the set, handing back the abort handles of everything that was live.
    pub fn drain(&self) -> Vec<(ConnectionId, AbortHandle)> {
        self.entries().drain().collect()
    }

    /// Ask every live connection to dispose itself, wait up to `grace` for
    /// the set to empty, then abort whatever is left.
    ///
    /// Returns the number of connections that had to be aborted.
    pub async fn close_all(&self, grace: Duration) -> usize {
        self.inner.closing.send_replace(true);
        if tokio::time::timeout(grace, self.wait_empty()).await.is_err() {
            tracing::debug!(remaining = self.len(), "Connections still live after close grace");
        }

        let stragglers = self.drain();
        for (id, handle) in &stragglers {
            tracing::trace!(connection_id = %id, "Aborting connection");
            handle.abort();
        }
        self.inner.closing.send_replace(false);
        stragglers.len()
    }

    async fn wait_empty(&self) {
        loop {
            let emptied = self.inner.emptied.notified();
            if self.is_empty() {
                return;
            }
            emptied.await;
        }
    }

    fn remove(&self, id: &ConnectionId) -> bool {
        let (removed, now_empty) = {
            let mut entries = self.entries();
            let removed = entries.remove(id).is_some();
            (removed, entries.is_empty())
        };
        if now_empty {
            self.inner.emptied.notify_waiters();
        }
        removed
    }
}

/// Membership of one connection in a [`LiveSet`].
///
/// Released on [`LiveGuard::release`] or on drop, whichever comes first.
/// Release counts the connection as closed.
#[derive(Debug)]
pub struct LiveGuard {
    id: ConnectionId,
    set: LiveSet,
    closing: watch::Receiver<bool>,
    released: bool,
}

impl LiveGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once the owning listener asks its connections to close.
    pub fn closing(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closing = self.closing.clone();
        async move {
            let _ = closing.wait_for(|closing| *closing).await;
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.set.remove(&self.id) {
            tracing::trace!(connection_id = %self.id, "Connection left live set");
        }
        metrics::record_connection_closed();
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}
