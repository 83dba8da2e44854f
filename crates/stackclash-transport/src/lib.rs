//! Transport abstraction layer for StackClash.
//!
//! Provides the [`Transport`], [`Connection`] and [`Connector`] traits that
//! abstract over how bytes reach the other peer. The server accepts
//! connections through a [`Transport`]; the client dials them through a
//! [`Connector`], which is what lets the resilience layer re-dial after a
//! drop.
//!
//! Liveness detection lives here too ([`HeartbeatMonitor`]): both ends of
//! the wire use the same ping/pong state machine, only the miss threshold
//! differs.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport over `tokio-tungstenite`

mod error;
mod heartbeat;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatStatus};
pub use memory::{MemoryConnection, MemoryConnector, MemoryListener};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientWebSocketConnection, WebSocketConnection, WebSocketConnector,
    WebSocketTransport,
};

use std::fmt;
use std::future::Future;

/// Identifies one accepted or dialed connection for its whole life.
///
/// Sessions remember the id of the connection that owns them, so a late
/// disconnect from a replaced connection can be told apart from the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Server side: yields connections as peers arrive.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Stops producing connections. Live ones are unaffected.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Client side: opens a fresh connection on every call, so it can be
/// invoked again after each drop.
///
/// The resilient client holds one connector for its whole life. Each
/// reconnect attempt calls [`connect`](Connector::connect) again, and a
/// failure there counts as one retry against the backoff policy.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static`: the connector moves into the client's driver
///   task and stays there.
/// - The returned future is `Send`, so the driver can await it from any
///   runtime thread.
///
/// [`MemoryConnector`] dials a [`MemoryListener`] in the same process.
/// Tests use it to drop and restore links without a socket.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// One bidirectional stream of frames.
///
/// A task parked in [`recv`](Connection::recv) must not stall a concurrent
/// [`send`](Connection::send) from another task.
pub trait Connection: Send + Sync + 'static {
    /// Writes one frame.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next frame, or `Ok(None)` once the peer has closed cleanly.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn id(&self) -> ConnectionId;
}
