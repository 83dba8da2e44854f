//! Wire protocol for StackClash.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): closed,
//!   `type`-tagged enums, one per direction.
//! - **Types** ([`BoardState`], [`PlayerView`], [`MatchSnapshot`], ids):
//!   the values those messages carry.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//! - **Sequencing** ([`SequenceGuard`]): the client's check that room
//!   messages arrive strictly in order.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (player identity). It doesn't know about connections or rooms.
//!
//! ```text
//! Transport (bytes) → Protocol (ClientMessage / ServerMessage) → Session
//! ```

mod codec;
mod error;
mod messages;
mod sequence;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{ClientMessage, ServerMessage};
pub use sequence::{SequenceCheck, SequenceGuard};
pub use types::{
    ActivePiece, BOARD_HEIGHT, BOARD_WIDTH, BoardState, CELL_EMPTY, CELL_GARBAGE, CELL_OBSTACLE,
    ErrorKind, MapId, MapPreference, MatchEndReason, MatchOutcome, MatchRecord, MatchSnapshot,
    MoveAction, PieceKind, PlayerStats, PlayerView, QueueStatus, RoomId, RoomPhase, SessionToken,
    UserId, UserInfo,
};
