//! Matchmaking for StackClash.
//!
//! Players waiting for an opponent sit in a [`MatchmakingQueue`]. After
//! every enqueue the server runs a pairing pass, which pops compatible
//! pairs oldest-first and hands them back as [`Pairing`]s with the map
//! already resolved. Creating the room is the caller's job.
//!
//! ```text
//! find_match ──→ enqueue() ──→ pair_all() ──→ Vec<Pairing> ──→ room spawn
//!                   ↑                              │
//! cancel_match ──→ cancel()                 (both entries removed)
//! ```

mod error;
mod queue;

pub use error::QueueError;
pub use queue::{MatchmakingQueue, Pairing, QueueEntry, resolve_map};
