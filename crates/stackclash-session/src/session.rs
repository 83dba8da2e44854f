//! Session types: the server's record of one authenticated player.
//!
//! A session tracks:
//! - WHO the player is (`UserInfo`)
//! - WHAT state the connection is in (connected, in grace, closed)
//! - WHERE to push messages (the outbox feeding the writer task)
//! - WHICH room the player is bound to, if any

use std::time::Duration;

use stackclash_protocol::{PlayerStats, RoomId, ServerMessage, SessionToken, UserId, UserInfo};
use stackclash_transport::{ConnectionId, HeartbeatConfig};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Sender half feeding a connection's writer task.
///
/// Unbounded so that a room never blocks on a slow socket; the writer task
/// is the only place that awaits the network.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts and limits for sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server ping cadence.
    pub heartbeat: HeartbeatConfig,

    /// Consecutive missed pongs before the connection is dropped and the
    /// session enters grace.
    pub missed_pongs_before_grace: u32,

    /// How long a session may sit in grace before it is closed.
    pub grace_period: Duration,

    /// Lifetime of an issued token, regardless of activity.
    pub token_ttl: Duration,

    /// How long an unauthenticated connection may stay silent.
    pub auth_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            missed_pongs_before_grace: 2,
            grace_period: Duration::from_secs(30),
            token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The connection lifecycle of a session.
///
/// ```text
///   Connected ──(drop / missed pongs)──→ Grace ──(grace elapsed)──→ Closed
///       ↑                                  │
///       └──────────(reconnect)─────────────┘
/// ```
///
/// `close` jumps straight to Closed from either state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Connection lost at `since`; the token still works until grace ends.
    Grace { since: Instant },
    Closed,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One authenticated player.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub user: UserInfo,
    pub state: ConnectionState,
    /// Room this session is playing in. Set by the registry at pairing,
    /// cleared when the room closes.
    pub room: Option<RoomId>,
    /// The connection currently serving this session.
    pub connection: Option<ConnectionId>,
    /// Refreshed on every inbound frame.
    pub last_seen: Instant,
    pub issued_at: Instant,
    pub(crate) outbox: Option<Outbox>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.user_id
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn stats(&self) -> PlayerStats {
        self.user.stats
    }

    /// A clone of the outbox, for handing to a room.
    pub fn outbox(&self) -> Option<Outbox> {
        self.outbox.clone()
    }

    /// Pushes a message to the connection's writer.
    ///
    /// No-op (returns `false`) when the session has no live connection.
    pub fn send(&self, msg: ServerMessage) -> bool {
        match &self.outbox {
            Some(outbox) => outbox.send(msg).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }
}
