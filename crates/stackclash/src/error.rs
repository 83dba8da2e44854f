//! Unified error type for the StackClash server.

use stackclash_matchmaking::QueueError;
use stackclash_protocol::ProtocolError;
use stackclash_room::RoomError;
use stackclash_session::SessionError;
use stackclash_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts layer errors without ceremony.
#[derive(Debug, thiserror::Error)]
pub enum StackClashError {
    /// Connection, send, or receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or message-shape failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication or session-token failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Routing to, or an operation inside, a match room.
    #[error(transparent)]
    Room(#[from] RoomError),
}
