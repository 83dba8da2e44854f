//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" converts between Rust types and raw bytes. The rest of the
//! stack only depends on the [`Codec`] trait, so the JSON wire format can
//! be swapped for a binary one without touching sessions or rooms.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync`: the server keeps one codec and every connection task
///   uses it. Those tasks run on any worker thread of the Tokio runtime.
/// - `'static`: the codec owns everything it holds. It lives as long as
///   the server and can be moved into spawned tasks.
///
/// ## Generic methods
///
/// `encode` and `decode` are generic over the message type, so one codec
/// handles `ClientMessage`, `ServerMessage` and anything else serde knows:
/// - `encode<T: Serialize>` turns any serializable value into bytes.
/// - `decode<T: DeserializeOwned>` builds a value that owns its data.
///
/// `DeserializeOwned` rather than `Deserialize<'de>` means the decoded
/// message never borrows from the frame buffer. The handler drops the
/// frame as soon as it is decoded and sends the message on to a room.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps the wire inspectable in browser DevTools and logs, and it is
/// what existing clients already speak.
///
/// ## Example
///
/// ```rust
/// use stackclash_protocol::{ClientMessage, Codec, JsonCodec, MapPreference};
///
/// let codec = JsonCodec;
/// let msg = ClientMessage::FindMatch {
///     map_preference: MapPreference::Classic,
/// };
///
/// let bytes = codec.encode(&msg).unwrap();
/// assert_eq!(
///     std::str::from_utf8(&bytes).unwrap(),
///     r#"{"type":"find_match","map_preference":"classic"}"#
/// );
///
/// let decoded: ClientMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
