//! Error types for the client layer.

use stackclash_protocol::ProtocolError;
use stackclash_transport::TransportError;

/// Errors surfaced by [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The background task has stopped, after `shutdown` or giving up.
    #[error("client is closed")]
    Closed,
}
