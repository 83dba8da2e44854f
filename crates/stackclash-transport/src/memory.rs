//! In-process transport backed by channels.
//!
//! Used by tests (and embedders) that want the full connection lifecycle
//! without sockets. A [`MemoryConnector`] dials a [`MemoryListener`]; each
//! dial produces a connected pair of [`MemoryConnection`]s. The connector
//! can be told to refuse dials, which is how reconnect paths are exercised.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{Connection, ConnectionId, Connector, Transport, TransportError};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1_000_000);

/// One end of an in-memory byte pipe.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Creates two connected ends. Bytes sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            id: ConnectionId::new(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed)),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock().map_err(|_| TransportError::Shutdown)?;
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        tx.send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Server half of the in-memory transport.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryListener {
    /// Creates a listener and the connector that dials it.
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector {
            inner: Arc::new(ConnectorInner {
                listener: tx,
                refusing: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
            }),
        };
        (Self { incoming: rx }, connector)
    }
}

impl Transport for MemoryListener {
    type Connection = MemoryConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct ConnectorInner {
    listener: mpsc::UnboundedSender<MemoryConnection>,
    refusing: AtomicBool,
    attempts: AtomicU64,
}

/// Client half of the in-memory transport. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<ConnectorInner>,
}

impl MemoryConnector {
    /// While set, every dial fails with [`TransportError::ConnectFailed`].
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of dials attempted so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory listener refusing",
            )));
        }
        let (client, server) = MemoryConnection::pair();
        self.inner
            .listener
            .send(server)
            .map_err(|_| TransportError::Shutdown)?;
        Ok(client)
    }
}
