//! # StackClash
//!
//! Authoritative match server for a two-player battle block-stacking game.
//!
//! The server owns every piece of shared state: who is logged in, who is
//! waiting for an opponent, and what is happening on both boards of every
//! live match. Clients only send inputs; the room decides what they do.
//!
//! ```text
//! StackClashServer ── accept ──→ handler (one task per connection)
//!        │                            │
//!        └──── Registry ◄─────────────┘
//!               ├─ SessionManager   (tokens, grace, reconnect)
//!               ├─ MatchmakingQueue (FIFO pairing)
//!               └─ RoomManager      (one actor task per match)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stackclash::prelude::*;
//!
//! # async fn run() -> Result<(), StackClashError> {
//! let server = StackClashServerBuilder::new()
//!     .bind("0.0.0.0:8765")
//!     .build(StandardRules, MemoryAccountStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod registry;
mod server;

pub use error::StackClashError;
pub use registry::Registry;
pub use server::{ServerConfig, StackClashServer, StackClashServerBuilder};

/// The types most servers need, in one import.
pub mod prelude {
    pub use crate::{ServerConfig, StackClashError, StackClashServer, StackClashServerBuilder};
    pub use stackclash_room::{BoardRules, RoomConfig, StandardRules, TieBreak};
    pub use stackclash_session::{AccountStore, MemoryAccountStore, SessionConfig};
    pub use stackclash_transport::HeartbeatConfig;
}
