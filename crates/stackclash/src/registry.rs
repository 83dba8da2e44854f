//! Shared server state: the session table, the matchmaking queue, and the
//! room directory.
//!
//! Every connection task holds an `Arc<Registry>`. The registry owns no
//! tasks of its own except the reaper spawned by
//! [`Registry::spawn_reaper`], which consumes room-closed notices and
//! sweeps sessions whose grace period ran out.
//!
//! # Lock order
//!
//! `sessions` is always taken first. `queue` and `rooms` may each be taken
//! while `sessions` is held, but never together, and no lock is held
//! across a room command.

use std::sync::Arc;
use std::time::Duration;

use stackclash_matchmaking::{MatchmakingQueue, Pairing, QueueError};
use stackclash_protocol::{MapPreference, QueueStatus, RoomId, ServerMessage, SessionToken, UserInfo};
use stackclash_room::{BoardRules, PlayerSeat, RoomConfig, RoomError, RoomHandle, RoomManager, RoomNotice};
use stackclash_session::{
    AccountStore, ConnectionState, Outbox, SessionConfig, SessionError, SessionManager,
};
use stackclash_transport::ConnectionId;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::StackClashError;

/// Sessions, queue, and rooms behind their locks.
pub struct Registry<R: BoardRules, A: AccountStore> {
    sessions: Mutex<SessionManager>,
    queue: Mutex<MatchmakingQueue>,
    rooms: RwLock<RoomManager<R>>,
    accounts: A,
    session_config: SessionConfig,
}

impl<R: BoardRules, A: AccountStore> Registry<R, A> {
    /// Creates an empty registry and the receiver the reaper consumes.
    pub fn new(
        rules: R,
        accounts: A,
        session_config: SessionConfig,
        room_config: RoomConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RoomNotice>) {
        let (rooms, notices) = RoomManager::new(Arc::new(rules), room_config);
        let registry = Self {
            sessions: Mutex::new(SessionManager::new(session_config.clone())),
            queue: Mutex::new(MatchmakingQueue::new()),
            rooms: RwLock::new(rooms),
            accounts,
            session_config,
        };
        (registry, notices)
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    // -- Authentication ---------------------------------------------------

    /// Creates an account. Does not log in.
    pub async fn register(&self, username: &str, password: &str) -> Result<UserInfo, SessionError> {
        self.accounts.register(username, password).await
    }

    /// Checks credentials and opens (or takes over) the user's session.
    ///
    /// A takeover keeps the existing token and room binding.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<(SessionToken, UserInfo), SessionError> {
        let user = self.accounts.authenticate(username, password).await?;
        let mut sessions = self.sessions.lock().await;
        let session = sessions.create(user, connection, outbox);
        Ok((session.token.clone(), session.user.clone()))
    }

    /// Rebinds an existing session to a new connection.
    pub async fn reconnect(
        &self,
        token: &SessionToken,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<UserInfo, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.reconnect(token, connection, outbox)?;
        Ok(session.user.clone())
    }

    /// Re-attaches a resumed session to its room.
    ///
    /// Returns `true` when the room took the new outbox; the room then
    /// sends the player a `resync`. Returns `false` if the session has no
    /// room or the room is already closing.
    pub async fn rejoin_room(&self, token: &SessionToken, outbox: Outbox) -> bool {
        let Ok(handle) = self.route(token).await else {
            return false;
        };
        match handle.reconnect(token.clone(), outbox).await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(%token, room_id = %handle.room_id(), error = %err, "room refused rejoin");
                false
            }
        }
    }

    // -- Matchmaking ------------------------------------------------------

    /// Queues the session, reports its position, and starts a room for
    /// every pair the queue can now form.
    ///
    /// The `matchmaking_status` goes out before any `match_found`.
    ///
    /// The sessions lock is held from the room check until every pairing
    /// is bound, so a paired session is never seen without its room.
    pub async fn find_match(
        &self,
        token: &SessionToken,
        preference: MapPreference,
    ) -> Result<usize, StackClashError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get(token).ok_or(SessionError::NotFound)?;
        if let Some(room_id) = session.room {
            return Err(QueueError::AlreadyInRoom(room_id).into());
        }
        let (user, outbox) = (session.user.clone(), session.outbox());

        let (position, pairings) = {
            let mut queue = self.queue.lock().await;
            let position = queue.enqueue(token.clone(), user, preference)?;
            let pairings = queue.pair_all(&mut rand::rng());
            (position, pairings)
        };

        if let Some(outbox) = outbox {
            let _ = outbox.send(ServerMessage::MatchmakingStatus {
                status: QueueStatus::Searching,
                queue_position: position,
            });
        }
        for pairing in pairings {
            self.start_match(&mut sessions, pairing).await;
        }
        Ok(position)
    }

    /// Removes the session's queue entry.
    pub async fn cancel_match(&self, token: &SessionToken) -> Result<(), QueueError> {
        self.queue.lock().await.cancel(token)?;
        tracing::debug!(%token, "matchmaking cancelled");
        Ok(())
    }

    async fn start_match(&self, sessions: &mut SessionManager, pairing: Pairing) {
        let Pairing { first, second, map } = pairing;

        // A player who dropped while queued gets a seat without an outbox
        // and starts the match in grace.
        let seats = [first, second].map(|entry| PlayerSeat {
            outbox: sessions.get(&entry.token).and_then(|s| s.outbox()),
            user: entry.user(),
            ticket: entry.ticket,
            token: entry.token,
        });
        let tokens = [seats[0].token.clone(), seats[1].token.clone()];

        let handle = self.rooms.write().await.create_room(seats, map);
        let room_id = handle.room_id();
        for token in &tokens {
            if let Err(err) = sessions.bind_room(token, room_id) {
                tracing::warn!(%token, %room_id, error = %err, "paired session vanished before its room started");
            }
        }
        tracing::info!(%room_id, %map, "match started");
    }

    // -- Routing ----------------------------------------------------------

    /// The room the session is bound to.
    ///
    /// # Panics
    /// If the session is bound to a room the directory does not know. The
    /// two are only ever changed together, so this means the registry is
    /// corrupt.
    pub async fn route(&self, token: &SessionToken) -> Result<RoomHandle, RoomError> {
        let sessions = self.sessions.lock().await;
        let room_id = sessions
            .get(token)
            .and_then(|s| s.room)
            .ok_or(RoomError::NotInRoom)?;
        let rooms = self.rooms.read().await;
        match rooms.handle(room_id) {
            Some(handle) => Ok(handle),
            None => {
                tracing::error!(%token, %room_id, "session bound to a room missing from the directory");
                panic!("registry corrupted: session bound to unknown room {room_id}");
            }
        }
    }

    // -- Connection loss --------------------------------------------------

    /// Refreshes the session's liveness timestamp.
    pub async fn touch(&self, token: &SessionToken) {
        self.sessions.lock().await.touch(token);
    }

    /// Ends a session for good: explicit `disconnect` from the client.
    pub async fn close_session(&self, token: &SessionToken) {
        let room = {
            let mut sessions = self.sessions.lock().await;
            match sessions.close(token) {
                Ok(room) => {
                    if room.is_none() {
                        sessions.cleanup_closed();
                    }
                    room
                }
                Err(err) => {
                    tracing::debug!(%token, error = %err, "close for unknown session");
                    return;
                }
            }
        };
        self.leave(token, room).await;
    }

    /// Moves a session into grace after `connection` dropped.
    ///
    /// Ignored if another connection has already taken the session over.
    pub async fn suspend_session(&self, token: &SessionToken, connection: ConnectionId) {
        let Some(room) = self.sessions.lock().await.suspend(token, connection) else {
            return;
        };
        self.leave(token, room).await;
    }

    /// Drops the queue entry and tells the bound room the player is gone.
    async fn leave(&self, token: &SessionToken, room: Option<RoomId>) {
        if self.queue.lock().await.cancel(token).is_ok() {
            tracing::debug!(%token, "queue entry dropped with its connection");
        }
        let Some(room_id) = room else {
            return;
        };
        let handle = self.rooms.read().await.handle(room_id);
        if let Some(handle) = handle {
            if let Err(err) = handle.disconnect(token.clone()).await {
                tracing::debug!(%token, %room_id, error = %err, "room already gone");
            }
        }
    }

    // -- Reaper -----------------------------------------------------------

    /// Spawns the task that releases closed rooms and expires sessions
    /// every `sweep_interval`.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<RoomNotice>,
        sweep_interval: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_interval);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    notice = notices.recv() => match notice {
                        Some(notice) => registry.on_room_notice(notice).await,
                        None => break,
                    },
                    _ = sweep.tick() => registry.sweep().await,
                }
            }
        })
    }

    /// Records the result, then releases the room and both bindings.
    async fn on_room_notice(&self, notice: RoomNotice) {
        let RoomNotice::Closed {
            room_id,
            record,
            tokens,
        } = notice;

        if let Some(record) = record {
            match self.accounts.record_result(&record).await {
                Ok((winner, loser)) => {
                    let mut sessions = self.sessions.lock().await;
                    sessions.update_stats(record.winner, winner);
                    sessions.update_stats(record.loser, loser);
                    tracing::info!(%room_id, winner = %record.winner, reason = %record.reason, "result recorded");
                }
                Err(err) => {
                    tracing::error!(%room_id, error = %err, "failed to record match result");
                }
            }
        }

        let mut sessions = self.sessions.lock().await;
        for token in &tokens {
            sessions.unbind_room(token, room_id);
        }
        self.rooms.write().await.unbind_room(room_id);
        let removed = sessions.cleanup_closed();
        tracing::debug!(%room_id, removed, "room released");
    }

    async fn sweep(&self) {
        let expired = self.sessions.lock().await.expire_stale();
        for (token, room) in &expired {
            self.leave(token, *room).await;
        }
        let removed = self.sessions.lock().await.cleanup_closed();
        if !expired.is_empty() || removed > 0 {
            tracing::debug!(expired = expired.len(), removed, "session sweep");
        }
    }

    /// Closes every room without a result. Each room still posts its notice.
    pub async fn shutdown(&self) {
        let rooms = self.rooms.read().await;
        tracing::info!(rooms = rooms.room_count(), "closing all rooms");
        rooms.shutdown_all().await;
    }

    // -- Diagnostics ------------------------------------------------------

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session_state(&self, token: &SessionToken) -> Option<ConnectionState> {
        self.sessions.lock().await.get(token).map(|session| session.state)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.room_count()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
