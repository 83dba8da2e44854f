//! Player session management for StackClash.
//!
//! This crate handles who a player is and whether they are reachable:
//!
//! 1. **Accounts**: the [`AccountStore`] boundary (login, registration,
//!    recording results) and an in-memory implementation.
//! 2. **Session tracking**: [`SessionManager`] issues tokens, tracks
//!    connection state, and remembers room bindings.
//! 3. **Reconnection**: a dropped connection puts the session in grace;
//!    presenting the token within grace (and within its TTL) resumes it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← pushes messages through each session's outbox
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← UserInfo, SessionToken, ServerMessage
//! ```

mod accounts;
mod error;
mod manager;
mod session;

pub use accounts::{
    AccountStore, MIN_PASSWORD_LEN, MIN_USERNAME_LEN, MemoryAccountStore, RATING_LOSS, RATING_WIN,
};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{ConnectionState, Outbox, Session, SessionConfig};
