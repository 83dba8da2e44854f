//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes or the message shape were
//! wrong, never the network. Callers warn, drop the frame and keep the
//! connection open.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing field, or an
    /// unknown `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but is not valid here, e.g. a `login`
    /// on an already authenticated connection.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
