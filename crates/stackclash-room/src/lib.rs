//! Match rooms for StackClash.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns both
//! boards, the match clock and the room phase.
//!
//! # Key types
//!
//! - [`BoardRules`]: the board engine a room drives
//! - [`StandardRules`]: the built-in engine
//! - [`RoomManager`]: creates rooms, routes sessions to them
//! - [`RoomHandle`]: sends commands to a running room actor
//! - [`RoomNotice`]: posted by a room when it closes
//! - [`RoomConfig`]: KO threshold, time limit, timeouts

mod config;
mod error;
mod manager;
mod room;
mod rules;
mod standard;

pub use config::{RoomConfig, TieBreak};
pub use error::RoomError;
pub use manager::RoomManager;
pub use room::{PlayerSeat, RoomHandle, RoomInfo, RoomNotice};
pub use rules::{BoardRules, GarbageOutcome, StepOutcome};
pub use stackclash_protocol::RoomPhase;
pub use standard::StandardRules;
