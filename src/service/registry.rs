//! RemoteConnectionRegistry: destination sockets held for remote agents.
//!
//! # Responsibilities
//! - Open destination sockets on behalf of agents, keyed by connection id
//! - Serve byte I/O against an entry, refreshing its activity on each call
//! - Bound growth with an opportunistic idle sweep on `open`
//!
//! # Design Decisions
//! - One mutex guards the map, the capacity check and the sweep; socket I/O
//!   happens outside it on the entry's own halves
//! - The sweep runs only once the entry count exceeds `max_entries` and only
//!   removes entries idle longer than `idle_timeout`. It is not an LRU: with
//!   no idle candidates the count may exceed the threshold
//! - Closing an entry wakes every in-flight read or write on it

use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;

use crate::error::{ProxyError, ProxyResult};
use crate::net::dial::dial;
use crate::observability::metrics;

/// Default entry count above which `open` sweeps idle entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default idle age after which an entry may be evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// One destination socket owned by the registry.
#[derive(Debug)]
pub struct RemoteConnection {
    id: String,
    host: String,
    port: u16,
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    last_active: Mutex<Instant>,
    closed: watch::Sender<bool>,
    read_chunk_size: usize,
}

impl RemoteConnection {
    fn new(id: &str, host: &str, port: u16, reader: OwnedReadHalf, writer: OwnedWriteHalf, read_chunk_size: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            last_active: Mutex::new(Instant::now()),
            closed,
            read_chunk_size: read_chunk_size.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Mark the entry closed. In-flight and later I/O fails with `ConnectionAborted`;
    /// the socket itself closes when the last handle is dropped.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            res = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await
            } => res,
            _ = closed.wait_for(|c| *c) => Err(aborted()),
        }
    }

    async fn read_chunk(&self) -> io::Result<Bytes> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            res = async {
                let mut buf = vec![0u8; self.read_chunk_size];
                let n = self.reader.lock().await.read(&mut buf).await?;
                buf.truncate(n);
                Ok::<_, io::Error>(Bytes::from(buf))
            } => res,
            _ = closed.wait_for(|c| *c) => Err(aborted()),
        }
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

/// Registry of destination sockets shared by every handler of one bridge service.
#[derive(Debug)]
pub struct RemoteConnectionRegistry {
    entries: Mutex<HashMap<String, Arc<RemoteConnection>>>,
    max_entries: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
    read_chunk_size: usize,
}

impl RemoteConnectionRegistry {
    pub fn new(max_entries: usize, idle_timeout: Duration, connect_timeout: Duration, read_chunk_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            idle_timeout,
            connect_timeout,
            read_chunk_size,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<RemoteConnection>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to `host:port` and register the socket under `id`.
    ///
    /// An existing entry with the same id is replaced and closed.
    pub async fn open(&self, id: &str, host: &str, port: u16) -> ProxyResult<Arc<RemoteConnection>> {
        let stream = dial(host, port, true, self.connect_timeout).await?;
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(RemoteConnection::new(id, host, port, reader, writer, self.read_chunk_size));

        let (evicted, replaced, len) = {
            let mut entries = self.entries();
            let evicted = if entries.len() > self.max_entries {
                evict_idle(&mut entries, self.idle_timeout)
            } else {
                Vec::new()
            };
            let replaced = entries.insert(id.to_string(), connection.clone());
            (evicted, replaced, entries.len())
        };

        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), remaining = len, "Evicted idle bridge connections");
            metrics::record_registry_evictions(evicted.len());
            for entry in &evicted {
                entry.close();
            }
        }
        if let Some(old) = replaced {
            tracing::warn!(connection_id = %id, "Bridge connection id reused; previous entry closed");
            old.close();
        }
        metrics::set_registry_entries(len);
        tracing::debug!(connection_id = %id, host, port, entries = len, "Bridge connection opened");
        Ok(connection)
    }

    /// Look up an entry without refreshing its activity.
    pub fn find(&self, id: &str) -> Option<Arc<RemoteConnection>> {
        self.entries().get(id).cloned()
    }

    /// Write `bytes` to the destination of `id`.
    pub async fn relay_to(&self, id: &str, bytes: &[u8]) -> ProxyResult<()> {
        let connection = self.find(id).ok_or_else(|| ProxyError::RegistryMiss(id.to_string()))?;
        connection.touch();
        let res = connection.write_all(bytes).await;
        connection.touch();
        res.map_err(ProxyError::Transport)
    }

    /// Read the next chunk from the destination of `id`; empty once it closed.
    pub async fn relay_from(&self, id: &str) -> ProxyResult<Bytes> {
        let connection = self.find(id).ok_or_else(|| ProxyError::RegistryMiss(id.to_string()))?;
        connection.touch();
        let res = connection.read_chunk().await;
        connection.touch();
        res.map_err(ProxyError::Transport)
    }

    /// Close and forget `id`. Returns whether an entry existed.
    pub fn remove(&self, id: &str) -> bool {
        let (removed, len) = {
            let mut entries = self.entries();
            let removed = entries.remove(id);
            (removed, entries.len())
        };
        match removed {
            Some(connection) => {
                connection.close();
                metrics::set_registry_entries(len);
                tracing::debug!(connection_id = %id, "Bridge connection closed");
                true
            }
            None => false,
        }
    }

    /// Close every entry.
    pub fn clear(&self) {
        let drained: Vec<_> = self.entries().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.close();
        }
        metrics::set_registry_entries(0);
        if !drained.is_empty() {
            tracing::info!(closed = drained.len(), "Bridge registry cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Remove every entry idle longer than `idle_timeout`, returning them.
fn evict_idle(entries: &mut HashMap<String, Arc<RemoteConnection>>, idle_timeout: Duration) -> Vec<Arc<RemoteConnection>> {
    let stale: Vec<String> = entries
        .iter()
        .filter(|(_, c)| c.idle_for() > idle_timeout)
        .map(|(id, _)| id.clone())
        .collect();
    stale.iter().filter_map(|id| entries.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Accepts connections and echoes whatever arrives.
    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        port
    }

    /// Accepts connections and holds them open without sending anything.
    async fn silent_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        port
    }

    fn registry(max_entries: usize, idle_timeout: Duration) -> RemoteConnectionRegistry {
        RemoteConnectionRegistry::new(max_entries, idle_timeout, Duration::from_secs(2), 1024)
    }

    #[tokio::test]
    async fn bytes_round_trip_through_entry() {
        let port = echo_server().await;
        let registry = registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT);

        registry.open("c1", "127.0.0.1", port).await.unwrap();
        registry.relay_to("c1", b"hello").await.unwrap();
        let chunk = registry.relay_from("c1").await.unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(registry.find("c1").unwrap().idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unknown_id_is_a_registry_miss() {
        let registry = registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT);
        assert!(registry.find("nope").is_none());
        let err = registry.relay_to("nope", b"x").await.unwrap_err();
        assert!(matches!(err, ProxyError::RegistryMiss(ref id) if id == "nope"));
        assert!(matches!(registry.relay_from("nope").await, Err(ProxyError::RegistryMiss(_))));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let port = silent_server().await;
        let registry = registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT);

        let entry = registry.open("c1", "127.0.0.1", port).await.unwrap();
        assert!(registry.remove("c1"));
        assert!(!registry.remove("c1"));
        assert!(entry.is_closed());
        assert!(matches!(registry.relay_to("c1", b"x").await, Err(ProxyError::RegistryMiss(_))));
    }

    #[tokio::test]
    async fn remove_wakes_pending_read() {
        let port = silent_server().await;
        let registry = Arc::new(registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT));
        registry.open("c1", "127.0.0.1", port).await.unwrap();

        let reader = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.relay_from("c1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.remove("c1");

        let res = tokio::time::timeout(Duration::from_secs(2), reader).await.unwrap().unwrap();
        assert!(matches!(res, Err(ProxyError::Transport(_))));
    }

    #[tokio::test]
    async fn open_past_threshold_evicts_idle_entries() {
        let port = silent_server().await;
        let registry = registry(2, Duration::from_millis(50));

        for id in ["a", "b", "c"] {
            registry.open(id, "127.0.0.1", port).await.unwrap();
        }
        assert_eq!(registry.len(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.open("d", "127.0.0.1", port).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.find("a").is_none());
        assert!(registry.find("d").is_some());
    }

    #[tokio::test]
    async fn threshold_may_be_exceeded_without_idle_candidates() {
        let port = silent_server().await;
        let registry = registry(2, DEFAULT_IDLE_TIMEOUT);

        for id in ["a", "b", "c", "d"] {
            registry.open(id, "127.0.0.1", port).await.unwrap();
        }
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn reopening_an_id_replaces_the_entry() {
        let port = silent_server().await;
        let registry = registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT);

        let first = registry.open("c1", "127.0.0.1", port).await.unwrap();
        let second = registry.open("c1", "127.0.0.1", port).await.unwrap();
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn open_to_closed_port_fails_without_entry() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let registry = registry(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT);
        let err = registry.open("c1", "127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ProxyError::DestinationUnreachable { .. }));
        assert!(registry.is_empty());
    }
}
