//! Room actor: an isolated Tokio task that owns one match.
//!
//! Each room runs in its own task and talks to the outside world only
//! through its bounded inbox and the players' outboxes. All match state
//! (boards, scores, KO counters, clock, phase) lives in the actor, so
//! every mutation is serialized by the inbox.
//!
//! ```text
//!   Starting ──(both ready / ready timeout)──→ Active
//!      │                                         │
//!      └──(forfeit)──→ Ending ←──(KO limit / time limit / forfeit)
//!                        │
//!                        └──(both acks / ending timeout)──→ Closed
//! ```

use std::sync::Arc;

use stackclash_clock::{ClockTick, MatchClock};
use stackclash_protocol::{
    BoardState, MapId, MatchEndReason, MatchOutcome, MatchRecord, MatchSnapshot, MoveAction,
    PlayerView, RoomId, RoomPhase, ServerMessage, SessionToken, UserInfo,
};
use stackclash_session::Outbox;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use crate::{BoardRules, RoomConfig, RoomError, TieBreak};

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// One player handed to a new room by matchmaking.
#[derive(Debug, Clone)]
pub struct PlayerSeat {
    pub token: SessionToken,
    pub user: UserInfo,
    /// Enqueue ticket; lower means queued earlier.
    pub ticket: u64,
    /// `None` if the player is already offline when the room spawns.
    pub outbox: Option<Outbox>,
}

/// Posted by a room to its owner when it shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotice {
    Closed {
        room_id: RoomId,
        /// `None` when the room was shut down before a result.
        record: Option<MatchRecord>,
        tokens: [SessionToken; 2],
    },
}

/// A snapshot of a room, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub phase: RoomPhase,
    pub map: MapId,
    pub players: [PlayerView; 2],
    pub clock_remaining_ms: u64,
    pub outcome: Option<MatchOutcome>,
}

/// Commands sent to a room actor through its inbox.
///
/// The `oneshot::Sender` in some variants is a reply channel: the caller
/// sends a command and waits for the answer on it.
pub(crate) enum RoomCommand {
    Ready {
        token: SessionToken,
    },
    Move {
        token: SessionToken,
        seq: u64,
        action: MoveAction,
    },
    Disconnect {
        token: SessionToken,
    },
    Reconnect {
        token: SessionToken,
        outbox: Outbox,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    RequestResync {
        token: SessionToken,
    },
    AckResult {
        token: SessionToken,
    },
    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },
    Shutdown,
}

/// Handle to a running room actor.
///
/// Cheap to clone: it is just an `mpsc::Sender` wrapper. The
/// [`RoomManager`](crate::RoomManager) holds one per room.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub async fn ready(&self, token: SessionToken) -> Result<(), RoomError> {
        self.send(RoomCommand::Ready { token }).await
    }

    /// Submits a move. Rejections come back to the player as a `resync`,
    /// not as an error here.
    pub async fn submit_move(
        &self,
        token: SessionToken,
        seq: u64,
        action: MoveAction,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Move { token, seq, action }).await
    }

    /// Reports that a player's connection is gone. Idempotent.
    pub async fn disconnect(&self, token: SessionToken) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect { token }).await
    }

    /// Re-attaches a player. The room replies with a `resync` on `outbox`.
    pub async fn reconnect(&self, token: SessionToken, outbox: Outbox) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Reconnect {
            token,
            outbox,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?
    }

    pub async fn request_resync(&self, token: SessionToken) -> Result<(), RoomError> {
        self.send(RoomCommand::RequestResync { token }).await
    }

    pub async fn ack_result(&self, token: SessionToken) -> Result<(), RoomError> {
        self.send(RoomCommand::AckResult { token }).await
    }

    pub async fn get_info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::GetInfo { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Tells the room to close without a result.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Slot {
    token: SessionToken,
    user: UserInfo,
    ticket: u64,
    board: BoardState,
    score: u64,
    ko_count: u32,
    kos_taken: u32,
    lines_sent: u32,
    last_move_seq: u64,
    /// Seq stamped on the next message this player receives.
    next_seq: u64,
    outbox: Option<Outbox>,
    ready: bool,
    grace_deadline: Option<Instant>,
    acked: bool,
}

impl Slot {
    fn new(seat: PlayerSeat, board: BoardState) -> Self {
        Self {
            token: seat.token,
            user: seat.user,
            ticket: seat.ticket,
            board,
            score: 0,
            ko_count: 0,
            kos_taken: 0,
            lines_sent: 0,
            last_move_seq: 0,
            next_seq: 1,
            outbox: seat.outbox,
            ready: false,
            grace_deadline: None,
            acked: false,
        }
    }

    fn view(&self) -> PlayerView {
        PlayerView {
            user_id: self.user.user_id,
            username: self.user.username.clone(),
            board: self.board.clone(),
            score: self.score,
            ko_count: self.ko_count,
            kos_taken: self.kos_taken,
            lines_sent: self.lines_sent,
            connected: self.outbox.is_some(),
        }
    }
}

struct RoomActor<R: BoardRules> {
    room_id: RoomId,
    config: RoomConfig,
    rules: Arc<R>,
    map: MapId,
    phase: RoomPhase,
    clock: MatchClock,
    slots: [Slot; 2],
    outcome: Option<MatchOutcome>,
    ready_deadline: Option<Instant>,
    ending_deadline: Option<Instant>,
    inbox: mpsc::Receiver<RoomCommand>,
    notices: mpsc::UnboundedSender<RoomNotice>,
}

/// Sleeps until `deadline`, or forever if there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<R: BoardRules> RoomActor<R> {
    /// Runs the actor loop until the room closes.
    async fn run(mut self) {
        tracing::info!(
            room_id = %self.room_id,
            map = %self.map,
            first = %self.slots[0].user.user_id,
            second = %self.slots[1].user.user_id,
            "room actor started"
        );

        let now = Instant::now();
        self.ready_deadline = Some(now + self.config.ready_timeout);
        for idx in 0..2 {
            let opponent = self.slots[1 - idx].user.clone();
            let (room_id, map) = (self.room_id, self.map);
            self.send_to(idx, |seq| ServerMessage::MatchFound {
                seq,
                room_id,
                map,
                opponent,
            });
        }
        // A player who dropped between pairing and spawn starts in grace.
        for idx in 0..2 {
            if self.slots[idx].outbox.is_none() {
                self.slots[idx].grace_deadline = Some(now + self.config.reconnect_grace);
                self.send_to(1 - idx, |seq| ServerMessage::OpponentDisconnected { seq });
            }
        }

        while self.phase != RoomPhase::Closed {
            let grace = self.next_grace_deadline();
            tokio::select! {
                cmd = self.inbox.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => self.close(),
                },
                tick = self.clock.wait_for_tick() => self.on_tick(tick),
                _ = sleep_until_opt(self.ready_deadline) => {
                    tracing::debug!(room_id = %self.room_id, "ready timeout, starting anyway");
                    self.activate();
                }
                _ = sleep_until_opt(grace) => self.on_grace_expired(),
                _ = sleep_until_opt(self.ending_deadline) => {
                    tracing::debug!(room_id = %self.room_id, "ending timeout");
                    self.close();
                }
            }
        }

        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Ready { token } => self.handle_ready(&token),
            RoomCommand::Move { token, seq, action } => self.handle_move(&token, seq, action),
            RoomCommand::Disconnect { token } => self.handle_disconnect(&token),
            RoomCommand::Reconnect {
                token,
                outbox,
                reply,
            } => {
                let result = self.handle_reconnect(&token, outbox);
                let _ = reply.send(result);
            }
            RoomCommand::RequestResync { token } => {
                if let Some(idx) = self.slot_of(&token) {
                    self.send_resync(idx);
                }
            }
            RoomCommand::AckResult { token } => self.handle_ack(&token),
            RoomCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_id = %self.room_id, "room shutting down");
                self.close();
            }
        }
    }

    // -- Starting ---------------------------------------------------------

    fn handle_ready(&mut self, token: &SessionToken) {
        let Some(idx) = self.slot_of(token) else {
            return;
        };
        if self.phase != RoomPhase::Starting {
            return;
        }
        self.slots[idx].ready = true;
        if self.slots.iter().all(|s| s.ready) {
            self.activate();
        }
    }

    fn activate(&mut self) {
        self.ready_deadline = None;
        if !self.transition(RoomPhase::Active) {
            return;
        }
        self.clock.start();
        tracing::info!(room_id = %self.room_id, "match started");
        self.broadcast_state();
    }

    // -- Active -----------------------------------------------------------

    fn handle_move(&mut self, token: &SessionToken, seq: u64, action: MoveAction) {
        let Some(idx) = self.slot_of(token) else {
            tracing::warn!(room_id = %self.room_id, %token, "move from non-member, ignoring");
            return;
        };

        if let Err(err) = self.validate_move(idx, seq) {
            tracing::debug!(room_id = %self.room_id, player = idx, error = %err, "move rejected");
            self.send_resync(idx);
            return;
        }
        self.slots[idx].last_move_seq = seq;

        let step = self.rules.step(&self.slots[idx].board, action);
        let mut overflow = step.overflow;
        {
            let slot = &mut self.slots[idx];
            slot.board = step.board;
            slot.score += step.score;
        }

        if step.locked {
            let mut outgoing = step.attack;
            let slot = &mut self.slots[idx];
            let cancelled = outgoing.min(slot.board.pending_attack);
            slot.board.pending_attack -= cancelled;
            outgoing -= cancelled;

            if outgoing > 0 {
                slot.lines_sent += outgoing;
                self.send_attack(1 - idx, outgoing);
            }

            let slot = &mut self.slots[idx];
            if step.lines_cleared == 0 && slot.board.pending_attack > 0 && !overflow {
                let lines = slot.board.pending_attack;
                let garbage = self.rules.add_garbage(&slot.board, lines);
                slot.board = garbage.board;
                slot.board.pending_attack = 0;
                overflow = garbage.overflow;
            }
        }

        let finished = overflow && self.knock_out(idx);
        self.broadcast_state();
        if finished {
            self.end(MatchEndReason::KoLimit, 1 - idx);
        }
    }

    fn validate_move(&self, idx: usize, seq: u64) -> Result<(), RoomError> {
        if self.phase != RoomPhase::Active {
            return Err(RoomError::WrongPhase(self.phase));
        }
        let expected = self.slots[idx].last_move_seq + 1;
        if seq != expected {
            return Err(RoomError::OutOfOrder {
                expected,
                got: seq,
            });
        }
        Ok(())
    }

    /// Queues garbage on `target`. Lost if `target` is offline: a frozen
    /// board takes no damage.
    fn send_attack(&mut self, target: usize, lines: u32) {
        if self.slots[target].outbox.is_none() {
            tracing::debug!(room_id = %self.room_id, lines, "attack on offline player discarded");
            return;
        }
        self.slots[target].board.pending_attack += lines;
        self.send_to(target, |seq| ServerMessage::Attack { seq, lines });
    }

    /// Scores a KO against `victim`. Returns `true` if the attacker has
    /// reached the threshold.
    fn knock_out(&mut self, victim: usize) -> bool {
        let attacker = 1 - victim;
        self.slots[attacker].ko_count += 1;
        self.slots[victim].kos_taken += 1;
        let seed = self.slots[victim].board.rng_state;
        self.slots[victim].board = self.rules.new_board(self.map, seed);

        let ko_count = self.slots[attacker].ko_count;
        let victim_id = self.slots[victim].user.user_id;
        tracing::info!(room_id = %self.room_id, victim = %victim_id, ko_count, "knock out");
        for idx in 0..2 {
            self.send_to(idx, |seq| ServerMessage::Ko {
                seq,
                victim: victim_id,
                ko_count,
            });
        }
        ko_count >= self.config.ko_threshold
    }

    fn on_tick(&mut self, tick: ClockTick) {
        tracing::trace!(room_id = %self.room_id, remaining_s = tick.remaining.as_secs(), "tick");
        if !tick.expired || self.phase != RoomPhase::Active {
            return;
        }
        let winner = self.time_limit_winner();
        self.end(MatchEndReason::TimeLimit, winner);
    }

    fn time_limit_winner(&self) -> usize {
        let [a, b] = &self.slots;
        if a.score != b.score {
            return if a.score > b.score { 0 } else { 1 };
        }
        if self.config.tie_break == TieBreak::FewerKosTakenThenEnqueueOrder
            && a.kos_taken != b.kos_taken
        {
            return if a.kos_taken < b.kos_taken { 0 } else { 1 };
        }
        if a.ticket <= b.ticket { 0 } else { 1 }
    }

    // -- Connection changes -----------------------------------------------

    fn handle_disconnect(&mut self, token: &SessionToken) {
        let Some(idx) = self.slot_of(token) else {
            return;
        };
        if self.slots[idx].outbox.is_none() {
            return;
        }
        self.slots[idx].outbox = None;
        tracing::info!(room_id = %self.room_id, player = %self.slots[idx].user.user_id, "player disconnected");

        if self.phase.is_live() {
            self.slots[idx].grace_deadline = Some(Instant::now() + self.config.reconnect_grace);
            self.send_to(1 - idx, |seq| ServerMessage::OpponentDisconnected { seq });
        } else if self.phase == RoomPhase::Ending {
            // Nobody left to show the result to.
            self.handle_ack(token);
        }
    }

    fn handle_reconnect(&mut self, token: &SessionToken, outbox: Outbox) -> Result<(), RoomError> {
        let idx = self.slot_of(token).ok_or(RoomError::NotInRoom)?;
        if self.phase == RoomPhase::Closed {
            return Err(RoomError::Unavailable(self.room_id));
        }
        let was_offline = self.slots[idx].outbox.is_none();
        self.slots[idx].outbox = Some(outbox);
        self.slots[idx].grace_deadline = None;
        tracing::info!(room_id = %self.room_id, player = %self.slots[idx].user.user_id, "player reconnected");

        self.send_resync(idx);
        if was_offline && self.phase.is_live() {
            self.send_to(1 - idx, |seq| ServerMessage::OpponentReconnected { seq });
        }
        Ok(())
    }

    fn next_grace_deadline(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|s| s.grace_deadline).min()
    }

    fn on_grace_expired(&mut self) {
        let now = Instant::now();
        let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.grace_deadline.is_some_and(|d| d <= now))
        else {
            return;
        };
        tracing::info!(
            room_id = %self.room_id,
            player = %self.slots[idx].user.user_id,
            "reconnect grace elapsed, forfeit"
        );
        self.end(MatchEndReason::Forfeit, 1 - idx);
    }

    // -- Ending / Closed --------------------------------------------------

    /// Decides the match. Only the first call has any effect.
    fn end(&mut self, reason: MatchEndReason, winner: usize) {
        if !self.phase.is_live() || !self.transition(RoomPhase::Ending) {
            return;
        }
        self.clock.stop();
        self.ready_deadline = None;
        for slot in &mut self.slots {
            slot.grace_deadline = None;
            slot.acked = slot.outbox.is_none();
        }

        let outcome = MatchOutcome {
            winner: self.slots[winner].user.user_id,
            winner_name: self.slots[winner].user.username.clone(),
            reason,
            duration_ms: self.clock.elapsed().as_millis() as u64,
        };
        tracing::info!(
            room_id = %self.room_id,
            winner = %outcome.winner,
            %reason,
            duration_ms = outcome.duration_ms,
            "match decided"
        );
        for idx in 0..2 {
            let outcome = outcome.clone();
            self.send_to(idx, |seq| ServerMessage::MatchResult {
                seq,
                winner: outcome.winner,
                winner_name: outcome.winner_name,
                reason: outcome.reason,
                duration_ms: outcome.duration_ms,
            });
        }
        self.outcome = Some(outcome);

        if self.slots.iter().all(|s| s.acked) {
            self.close();
        } else {
            self.ending_deadline = Some(Instant::now() + self.config.ending_timeout);
        }
    }

    fn handle_ack(&mut self, token: &SessionToken) {
        let Some(idx) = self.slot_of(token) else {
            return;
        };
        if self.phase != RoomPhase::Ending {
            return;
        }
        self.slots[idx].acked = true;
        if self.slots.iter().all(|s| s.acked) {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.phase == RoomPhase::Closed {
            return;
        }
        self.phase = RoomPhase::Closed;
        self.clock.stop();
        self.ready_deadline = None;
        self.ending_deadline = None;

        let record = self.outcome.as_ref().map(|outcome| {
            let winner = if self.slots[0].user.user_id == outcome.winner { 0 } else { 1 };
            MatchRecord {
                room_id: self.room_id,
                map: self.map,
                winner: self.slots[winner].user.user_id,
                loser: self.slots[1 - winner].user.user_id,
                reason: outcome.reason,
                duration_ms: outcome.duration_ms,
                winner_kos: self.slots[winner].ko_count,
                loser_kos: self.slots[1 - winner].ko_count,
            }
        });
        let tokens = [self.slots[0].token.clone(), self.slots[1].token.clone()];
        tracing::info!(room_id = %self.room_id, decided = record.is_some(), "room closed");
        let _ = self.notices.send(RoomNotice::Closed {
            room_id: self.room_id,
            record,
            tokens,
        });
    }

    // -- Helpers ----------------------------------------------------------

    fn transition(&mut self, target: RoomPhase) -> bool {
        if !self.phase.can_transition_to(target) {
            return false;
        }
        tracing::debug!(room_id = %self.room_id, from = %self.phase, to = %target, "phase change");
        self.phase = target;
        true
    }

    fn slot_of(&self, token: &SessionToken) -> Option<usize> {
        self.slots.iter().position(|s| &s.token == token)
    }

    /// Stamps and sends one message. Offline players get nothing and
    /// consume no sequence number; a resync re-bases them on return.
    fn send_to(&mut self, idx: usize, build: impl FnOnce(u64) -> ServerMessage) {
        let slot = &mut self.slots[idx];
        let Some(outbox) = &slot.outbox else {
            return;
        };
        let seq = slot.next_seq;
        if outbox.send(build(seq)).is_ok() {
            slot.next_seq += 1;
        }
    }

    fn broadcast_state(&mut self) {
        let remaining = self.clock.remaining().as_millis() as u64;
        for idx in 0..2 {
            let you = self.slots[idx].view();
            let opponent = self.slots[1 - idx].view();
            self.send_to(idx, |seq| ServerMessage::GameState {
                seq,
                you,
                opponent,
                clock_remaining_ms: remaining,
            });
        }
    }

    fn send_resync(&mut self, idx: usize) {
        let full_state = Box::new(self.snapshot(idx));
        self.send_to(idx, |seq| ServerMessage::Resync { seq, full_state });
    }

    fn snapshot(&self, idx: usize) -> MatchSnapshot {
        MatchSnapshot {
            room_id: self.room_id,
            map: self.map,
            phase: self.phase,
            you: self.slots[idx].view(),
            opponent: self.slots[1 - idx].view(),
            last_move_seq: self.slots[idx].last_move_seq,
            clock_elapsed_ms: self.clock.elapsed().as_millis() as u64,
            clock_remaining_ms: self.clock.remaining().as_millis() as u64,
            outcome: self.outcome.clone(),
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id,
            phase: self.phase,
            map: self.map,
            players: [self.slots[0].view(), self.slots[1].view()],
            clock_remaining_ms: self.clock.remaining().as_millis() as u64,
            outcome: self.outcome.clone(),
        }
    }
}

/// Spawns a room actor task and returns a handle to it.
///
/// Both boards come from the same seed so the players see the same piece
/// sequence.
pub(crate) fn spawn_room<R: BoardRules>(
    room_id: RoomId,
    seats: [PlayerSeat; 2],
    map: MapId,
    seed: u64,
    rules: Arc<R>,
    config: RoomConfig,
    notices: mpsc::UnboundedSender<RoomNotice>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.inbox_size.max(1));
    let [first, second] = seats;
    let slots = [
        Slot::new(first, rules.new_board(map, seed)),
        Slot::new(second, rules.new_board(map, seed)),
    ];

    let actor = RoomActor {
        room_id,
        clock: MatchClock::new(config.clock()),
        config,
        rules,
        map,
        phase: RoomPhase::Starting,
        slots,
        outcome: None,
        ready_deadline: None,
        ending_deadline: None,
        inbox: rx,
        notices,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
