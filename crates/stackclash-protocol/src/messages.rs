//! Client and server message envelopes.
//!
//! Both directions are closed enums decoded once at the connection
//! boundary. On the wire every message is a JSON object whose `type`
//! field names the variant in snake_case:
//!
//! ```json
//! { "type": "move", "seq": 12, "action": "hard_drop" }
//! ```
//!
//! Room-emitted server messages carry a `seq` that counts up by one per
//! message the recipient receives from that room. Clients check it with a
//! [`SequenceGuard`](crate::SequenceGuard).

use serde::{Deserialize, Serialize};

use crate::types::{
    ErrorKind, MapId, MapPreference, MatchEndReason, MatchSnapshot, MoveAction, PlayerView,
    QueueStatus, RoomId, SessionToken, UserId, UserInfo,
};

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create an account. Does not log in.
    Register { username: String, password: String },

    /// Authenticate and obtain a session token.
    Login { username: String, password: String },

    /// Resume an existing session with a previously issued token.
    Reconnect { session_token: SessionToken },

    /// Join the matchmaking queue.
    FindMatch {
        #[serde(default)]
        map_preference: MapPreference,
    },

    /// Leave the matchmaking queue.
    CancelMatch,

    /// The player is ready for the match to start.
    Ready,

    /// One input. `seq` must be exactly one more than the previous
    /// accepted move in this room.
    Move { seq: u64, action: MoveAction },

    /// Ask the room for a full `resync`, typically after a sequence gap.
    RequestResync,

    /// The client has shown the match result.
    AckResult,

    HeartbeatPing { nonce: u64 },
    HeartbeatPong { nonce: u64 },

    /// Graceful goodbye.
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ClientMessage {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::Reconnect { .. } => "reconnect",
            Self::FindMatch { .. } => "find_match",
            Self::CancelMatch => "cancel_match",
            Self::Ready => "ready",
            Self::Move { .. } => "move",
            Self::RequestResync => "request_resync",
            Self::AckResult => "ack_result",
            Self::HeartbeatPing { .. } => "heartbeat_ping",
            Self::HeartbeatPong { .. } => "heartbeat_pong",
            Self::Disconnect { .. } => "disconnect",
        }
    }

    /// Messages only valid before the connection is authenticated.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Register { .. } | Self::Login { .. } | Self::Reconnect { .. }
        )
    }
}

/// Everything the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterOk {
        user: UserInfo,
    },
    RegisterError {
        reason: String,
    },
    /// Stats travel inside `user`.
    LoginOk {
        session_token: SessionToken,
        user: UserInfo,
    },
    LoginError {
        reason: String,
    },
    MatchmakingStatus {
        status: QueueStatus,
        queue_position: usize,
    },
    MatchmakingCancelled,

    // -- room messages (sequenced) --
    /// First message from a room. Always `seq` 1.
    MatchFound {
        seq: u64,
        room_id: RoomId,
        map: MapId,
        opponent: UserInfo,
    },
    GameState {
        seq: u64,
        you: PlayerView,
        opponent: PlayerView,
        clock_remaining_ms: u64,
    },
    Attack {
        seq: u64,
        lines: u32,
    },
    Ko {
        seq: u64,
        victim: UserId,
        ko_count: u32,
    },
    OpponentDisconnected {
        seq: u64,
    },
    OpponentReconnected {
        seq: u64,
    },
    /// Full authoritative state. Re-bases the recipient's sequence.
    Resync {
        seq: u64,
        full_state: Box<MatchSnapshot>,
    },
    MatchResult {
        seq: u64,
        winner: UserId,
        winner_name: String,
        reason: MatchEndReason,
        duration_ms: u64,
    },
    // -- end room messages --
    ResyncError {
        reason: String,
    },
    HeartbeatPing {
        nonce: u64,
    },
    HeartbeatPong {
        nonce: u64,
    },
    Error {
        code: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    /// The room sequence number, if this is a room-emitted message.
    pub fn room_seq(&self) -> Option<u64> {
        match self {
            Self::MatchFound { seq, .. }
            | Self::GameState { seq, .. }
            | Self::Attack { seq, .. }
            | Self::Ko { seq, .. }
            | Self::OpponentDisconnected { seq }
            | Self::OpponentReconnected { seq }
            | Self::Resync { seq, .. }
            | Self::MatchResult { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Shorthand for an `error` message.
    pub fn error(code: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            kind,
            message: message.into(),
        }
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterOk { .. } => "register_ok",
            Self::RegisterError { .. } => "register_error",
            Self::LoginOk { .. } => "login_ok",
            Self::LoginError { .. } => "login_error",
            Self::MatchmakingStatus { .. } => "matchmaking_status",
            Self::MatchmakingCancelled => "matchmaking_cancelled",
            Self::MatchFound { .. } => "match_found",
            Self::GameState { .. } => "game_state",
            Self::Attack { .. } => "attack",
            Self::Ko { .. } => "ko",
            Self::OpponentDisconnected { .. } => "opponent_disconnected",
            Self::OpponentReconnected { .. } => "opponent_reconnected",
            Self::Resync { .. } => "resync",
            Self::MatchResult { .. } => "match_result",
            Self::ResyncError { .. } => "resync_error",
            Self::HeartbeatPing { .. } => "heartbeat_ping",
            Self::HeartbeatPong { .. } => "heartbeat_pong",
            Self::Error { .. } => "error",
        }
    }
}
