//! Error types for the session layer.

/// Errors that can occur during authentication and session management.
///
/// None of these change server state: a failed login creates no session,
/// a rejected reconnect leaves the old session untouched.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Username/password did not match an account.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Registration rejected because the name is in use.
    #[error("username already taken: {0}")]
    UsernameTaken(String),

    /// Registration rejected because a field is malformed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The reconnection token was never issued (or was already cleaned up).
    #[error("invalid session token")]
    InvalidToken,

    /// The token outlived its time-to-live.
    #[error("session token expired")]
    TokenExpired,

    /// The session was closed (explicit disconnect or grace elapsed).
    #[error("session closed")]
    SessionClosed,

    /// No session exists for the given token.
    #[error("session not found")]
    NotFound,
}
