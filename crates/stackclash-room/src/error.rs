//! Error types for the room layer.

use stackclash_protocol::{RoomId, RoomPhase};

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    /// The room does not exist (or already closed).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The session is not a player in this room.
    #[error("session is not in a room")]
    NotInRoom,

    /// The room's phase does not allow this operation, e.g. a move
    /// before the match went live.
    #[error("operation not allowed while room is {0}")]
    WrongPhase(RoomPhase),

    /// A move arrived with a sequence number other than last + 1.
    #[error("move out of order: expected seq {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    /// The room's inbox is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}
