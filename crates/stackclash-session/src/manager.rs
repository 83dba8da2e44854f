//! The session manager: every authenticated player, keyed by token.
//!
//! Responsibilities:
//! - Issuing tokens when players log in
//! - Validating tokens on `reconnect` (exists, within TTL, not closed)
//! - Tracking connection state through drops and grace periods
//! - Remembering which room each session is bound to
//! - Dropping sessions once they are closed and no room needs them
//!
//! # Concurrency note
//!
//! `SessionManager` is a plain struct over `HashMap`s. The server's
//! registry wraps it in one `tokio::sync::Mutex`; nothing in here awaits.

use std::collections::HashMap;

use rand::Rng;
use stackclash_protocol::{PlayerStats, RoomId, SessionToken, UserId, UserInfo};
use stackclash_transport::ConnectionId;
use tokio::time::Instant;

use crate::{ConnectionState, Outbox, Session, SessionConfig, SessionError};

/// Characters used for tokens: the URL-safe base64 alphabet.
const TOKEN_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 43 characters of 6 bits each, just over 256 bits of entropy.
const TOKEN_LEN: usize = 43;

/// Tracks every session, live or in grace.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ suspend() ──→ reconnect() ──→ close()
///    │             │                            │
///    ▼             ▼                            ▼
/// [Connected]   [Grace] ──expire_stale()──→ [Closed] ──cleanup_closed()──→ gone
/// ```
pub struct SessionManager {
    sessions: HashMap<SessionToken, Session>,
    /// One live session per user.
    by_user: HashMap<UserId, SessionToken>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates (or takes over) the session for a freshly authenticated user.
    ///
    /// If the user already has a session that is not closed, that session
    /// is rebound to the new connection and keeps its token and room. A
    /// previous connection's outbox is dropped, which ends its writer.
    pub fn create(&mut self, user: UserInfo, connection: ConnectionId, outbox: Outbox) -> &Session {
        let now = Instant::now();
        let user_id = user.user_id;

        let existing = self
            .by_user
            .get(&user_id)
            .filter(|token| {
                self.sessions
                    .get(*token)
                    .is_some_and(|s| s.state != ConnectionState::Closed && !self.is_past_ttl(s, now))
            })
            .cloned();

        let token = match existing {
            Some(token) => {
                tracing::info!(%user_id, %connection, "login took over existing session");
                token
            }
            None => {
                let token = generate_token();
                self.by_user.insert(user_id, token.clone());
                tracing::info!(%user_id, %connection, %token, "session created");
                token
            }
        };

        let session = self
            .sessions
            .entry(token)
            .or_insert_with_key(|token| Session {
                token: token.clone(),
                user: user.clone(),
                state: ConnectionState::Connected,
                room: None,
                connection: None,
                last_seen: now,
                issued_at: now,
                outbox: None,
            });
        session.user = user;
        attach(session, connection, outbox, now);
        session
    }

    /// Checks that `token` names a usable session.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: never issued or already removed
    /// - [`SessionError::TokenExpired`]: older than `token_ttl`
    /// - [`SessionError::SessionClosed`]: closed explicitly or after grace
    pub fn validate(&self, token: &SessionToken) -> Result<&Session, SessionError> {
        let session = self.sessions.get(token).ok_or(SessionError::InvalidToken)?;
        if self.is_past_ttl(session, Instant::now()) {
            return Err(SessionError::TokenExpired);
        }
        match session.state {
            ConnectionState::Closed => Err(SessionError::SessionClosed),
            ConnectionState::Grace { since } if since.elapsed() > self.config.grace_period => {
                Err(SessionError::SessionClosed)
            }
            _ => Ok(session),
        }
    }

    /// Rebinds a session to a new connection.
    ///
    /// Works from Grace and from Connected (a second device or a client
    /// that noticed the drop before the server did takes over).
    pub fn reconnect(
        &mut self,
        token: &SessionToken,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<&Session, SessionError> {
        let checked = self.validate(token).map(|_| ());
        if let Err(err) = checked {
            if matches!(err, SessionError::TokenExpired | SessionError::SessionClosed) {
                if let Some(session) = self.sessions.get_mut(token) {
                    session.state = ConnectionState::Closed;
                    session.outbox = None;
                }
            }
            tracing::warn!(%token, %connection, error = %err, "reconnect rejected");
            return Err(err);
        }

        let now = Instant::now();
        let session = self.sessions.get_mut(token).ok_or(SessionError::InvalidToken)?;
        attach(session, connection, outbox, now);
        tracing::info!(user_id = %session.user.user_id, %connection, "session reconnected");
        Ok(session)
    }

    /// Refreshes the liveness timestamp.
    pub fn touch(&mut self, token: &SessionToken) {
        if let Some(session) = self.sessions.get_mut(token) {
            session.last_seen = Instant::now();
        }
    }

    /// Moves a session into grace after its connection dropped.
    ///
    /// Only acts if `connection` is still the one serving the session, so a
    /// late drop of a replaced connection cannot suspend the new one.
    /// Returns the bound room when the session actually entered grace.
    pub fn suspend(&mut self, token: &SessionToken, connection: ConnectionId) -> Option<Option<RoomId>> {
        let session = self.sessions.get_mut(token)?;
        if session.connection != Some(connection) || !session.is_connected() {
            return None;
        }
        session.state = ConnectionState::Grace {
            since: Instant::now(),
        };
        session.connection = None;
        session.outbox = None;
        tracing::info!(user_id = %session.user.user_id, %connection, "session entered grace");
        Some(session.room)
    }

    /// Closes a session for good. Returns the room it was bound to.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the token is unknown.
    pub fn close(&mut self, token: &SessionToken) -> Result<Option<RoomId>, SessionError> {
        let session = self.sessions.get_mut(token).ok_or(SessionError::NotFound)?;
        if session.state != ConnectionState::Closed {
            tracing::info!(user_id = %session.user.user_id, "session closed");
        }
        session.state = ConnectionState::Closed;
        session.connection = None;
        session.outbox = None;
        Ok(session.room)
    }

    /// Closes sessions whose grace period or token TTL has elapsed.
    ///
    /// Returns the closed tokens with the room each was bound to, so the
    /// caller can tell those rooms.
    pub fn expire_stale(&mut self) -> Vec<(SessionToken, Option<RoomId>)> {
        let now = Instant::now();
        let grace = self.config.grace_period;
        let ttl = self.config.token_ttl;
        let mut expired = Vec::new();

        for session in self.sessions.values_mut() {
            let past_grace = matches!(
                session.state,
                ConnectionState::Grace { since } if now.duration_since(since) > grace
            );
            let past_ttl = session.state != ConnectionState::Closed
                && now.duration_since(session.issued_at) > ttl;
            if past_grace || past_ttl {
                session.state = ConnectionState::Closed;
                session.connection = None;
                session.outbox = None;
                expired.push((session.token.clone(), session.room));
                tracing::info!(
                    user_id = %session.user.user_id,
                    past_grace,
                    past_ttl,
                    "session expired"
                );
            }
        }

        expired
    }

    /// Removes closed sessions that no room references any more.
    ///
    /// Returns how many were removed.
    pub fn cleanup_closed(&mut self) -> usize {
        let before = self.sessions.len();
        let by_user = &mut self.by_user;
        self.sessions.retain(|token, session| {
            let dead = session.state == ConnectionState::Closed && session.room.is_none();
            if dead && by_user.get(&session.user.user_id) == Some(token) {
                by_user.remove(&session.user.user_id);
            }
            !dead
        });
        before - self.sessions.len()
    }

    /// Records that the session is playing in `room`.
    pub fn bind_room(&mut self, token: &SessionToken, room: RoomId) -> Result<(), SessionError> {
        let session = self.sessions.get_mut(token).ok_or(SessionError::NotFound)?;
        session.room = Some(room);
        Ok(())
    }

    /// Clears the room binding, but only if it still points at `room`.
    pub fn unbind_room(&mut self, token: &SessionToken, room: RoomId) {
        if let Some(session) = self.sessions.get_mut(token) {
            if session.room == Some(room) {
                session.room = None;
            }
        }
    }

    /// Replaces the cached stats after a result was recorded.
    pub fn update_stats(&mut self, user_id: UserId, stats: PlayerStats) {
        if let Some(session) = self
            .by_user
            .get(&user_id)
            .and_then(|token| self.sessions.get_mut(token))
        {
            session.user.stats = stats;
        }
    }

    pub fn get(&self, token: &SessionToken) -> Option<&Session> {
        self.sessions.get(token)
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_past_ttl(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.issued_at) > self.config.token_ttl
    }
}

fn attach(session: &mut Session, connection: ConnectionId, outbox: Outbox, now: Instant) {
    session.state = ConnectionState::Connected;
    session.connection = Some(connection);
    session.outbox = Some(outbox);
    session.last_seen = now;
}

/// Generates a 43-character URL-safe token.
fn generate_token() -> SessionToken {
    let mut rng = rand::rng();
    let raw: String = (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    SessionToken::new(raw)
}

// =========================================================================
// Tests
// =========================================================================
