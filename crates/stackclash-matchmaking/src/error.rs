//! Error types for the matchmaking layer.

use stackclash_protocol::RoomId;

/// Errors from queue operations. None of them change queue state.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// The session already has a queue entry.
    #[error("already in the matchmaking queue")]
    AlreadyQueued,

    /// The session is bound to a live room.
    #[error("already in room {0}")]
    AlreadyInRoom(RoomId),

    /// Cancel for a session that is not queued.
    #[error("not in the matchmaking queue")]
    NotQueued,
}
