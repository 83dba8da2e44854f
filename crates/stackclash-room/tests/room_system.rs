//! Integration tests for the room actor and manager, driven by a scripted
//! board engine so every input has a known effect.
//!
//! All tests run on a paused tokio clock. A `get_info` round trip is used
//! as a barrier: once it returns, every message the room produced for the
//! commands sent before it is already in the player outboxes.

use std::sync::Arc;
use std::time::Duration;

use stackclash_protocol::{
    BoardState, CELL_EMPTY, CELL_GARBAGE, MapId, MatchEndReason, MoveAction, PlayerStats,
    RoomPhase, ServerMessage, SessionToken, UserId, UserInfo,
};
use stackclash_room::{
    BoardRules, GarbageOutcome, PlayerSeat, RoomConfig, RoomError, RoomHandle, RoomInfo,
    RoomManager, RoomNotice, StepOutcome, TieBreak,
};
use tokio::sync::mpsc;

// =========================================================================
// Scripted rules
// =========================================================================

/// Each action has a fixed effect:
///
/// | action      | effect                                   |
/// |-------------|------------------------------------------|
/// | Left/Right  | nothing                                  |
/// | RotateCw    | nothing                                  |
/// | RotateCcw   | lock, no lines                           |
/// | Down        | lock, 1 line, 100 points, no attack      |
/// | Hold        | lock, 4 lines, 800 points, 4 attack      |
/// | HardDrop    | lock, overflow                           |
struct ScriptedRules;

impl BoardRules for ScriptedRules {
    fn new_board(&self, _map: MapId, seed: u64) -> BoardState {
        BoardState::empty(seed)
    }

    fn step(&self, board: &BoardState, action: MoveAction) -> StepOutcome {
        let lock = |lines_cleared, attack, score, overflow| StepOutcome {
            board: board.clone(),
            locked: true,
            lines_cleared,
            attack,
            score,
            overflow,
        };
        match action {
            MoveAction::Left | MoveAction::Right | MoveAction::RotateCw => {
                StepOutcome::unchanged(board)
            }
            MoveAction::RotateCcw => lock(0, 0, 0, false),
            MoveAction::Down => lock(1, 0, 100, false),
            MoveAction::Hold => lock(4, 4, 800, false),
            MoveAction::HardDrop => lock(0, 0, 0, true),
        }
    }

    fn add_garbage(&self, board: &BoardState, lines: u32) -> GarbageOutcome {
        let mut board = board.clone();
        let height = board.grid.len();
        for row in board.grid.iter_mut().skip(height.saturating_sub(lines as usize)) {
            row.fill(CELL_GARBAGE);
        }
        GarbageOutcome {
            board,
            overflow: false,
        }
    }
}

// =========================================================================
// Fixture
// =========================================================================

struct Player {
    token: SessionToken,
    user_id: UserId,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Player {
    /// Everything queued so far.
    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn kinds(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerMessage::kind).collect()
    }
}

struct Match {
    manager: RoomManager<ScriptedRules>,
    notices: mpsc::UnboundedReceiver<RoomNotice>,
    room: RoomHandle,
    players: [Player; 2],
}

impl Match {
    async fn info(&self) -> RoomInfo {
        self.room.get_info().await.expect("room alive")
    }

    fn token(&self, idx: usize) -> SessionToken {
        self.players[idx].token.clone()
    }

    async fn play(&self, idx: usize, seq: u64, action: MoveAction) {
        self.room
            .submit_move(self.token(idx), seq, action)
            .await
            .expect("room alive");
    }

    /// Both ready, room Active, outboxes drained.
    async fn start(&mut self) {
        self.room.ready(self.token(0)).await.unwrap();
        self.room.ready(self.token(1)).await.unwrap();
        assert_eq!(self.info().await.phase, RoomPhase::Active);
        self.players[0].drain();
        self.players[1].drain();
    }
}

fn seat(n: u64, ticket: u64) -> (PlayerSeat, Player) {
    let token = SessionToken::new(format!("token-{n}"));
    let user = UserInfo {
        user_id: UserId(n),
        username: format!("player{n}"),
        stats: PlayerStats::default(),
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let seat = PlayerSeat {
        token: token.clone(),
        user,
        ticket,
        outbox: Some(tx),
    };
    (
        seat,
        Player {
            token,
            user_id: UserId(n),
            rx,
        },
    )
}

fn test_config() -> RoomConfig {
    RoomConfig {
        time_limit: Duration::from_secs(60),
        ..RoomConfig::default()
    }
}

async fn new_match_with_tickets(config: RoomConfig, tickets: [u64; 2]) -> Match {
    let (mut manager, notices) = RoomManager::new(Arc::new(ScriptedRules), config);
    let (a, pa) = seat(1, tickets[0]);
    let (b, pb) = seat(2, tickets[1]);
    let room = manager.create_room([a, b], MapId::Standard);
    let m = Match {
        manager,
        notices,
        room,
        players: [pa, pb],
    };
    // Barrier: match_found is in both outboxes.
    m.info().await;
    m
}

async fn new_match(config: RoomConfig) -> Match {
    new_match_with_tickets(config, [1, 2]).await
}

fn match_result(msgs: &[ServerMessage]) -> Vec<(UserId, MatchEndReason, u64)> {
    msgs.iter()
        .filter_map(|m| match m {
            ServerMessage::MatchResult {
                winner,
                reason,
                duration_ms,
                ..
            } => Some((*winner, *reason, *duration_ms)),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Starting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_room_sends_match_found_with_seq_one() {
    let mut m = new_match(test_config()).await;

    let msgs = m.players[0].drain();
    assert_eq!(msgs.len(), 1);
    match &msgs[0] {
        ServerMessage::MatchFound {
            seq,
            room_id,
            map,
            opponent,
        } => {
            assert_eq!(*seq, 1);
            assert_eq!(*room_id, m.room.room_id());
            assert_eq!(*map, MapId::Standard);
            assert_eq!(opponent.user_id, UserId(2));
        }
        other => panic!("expected match_found, got {other:?}"),
    }
    assert_eq!(m.players[1].kinds(), vec!["match_found"]);
    assert_eq!(m.info().await.phase, RoomPhase::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_room_goes_active_when_both_ready() {
    let mut m = new_match(test_config()).await;
    m.players[0].drain();

    m.room.ready(m.token(0)).await.unwrap();
    assert_eq!(m.info().await.phase, RoomPhase::Starting);

    m.room.ready(m.token(1)).await.unwrap();
    assert_eq!(m.info().await.phase, RoomPhase::Active);

    let msgs = m.players[0].drain();
    assert_eq!(msgs.len(), 1);
    assert!(matches!(
        msgs[0],
        ServerMessage::GameState {
            seq: 2,
            clock_remaining_ms: 60_000,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_room_goes_active_after_ready_timeout() {
    let m = new_match(test_config()).await;
    m.room.ready(m.token(0)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(m.info().await.phase, RoomPhase::Starting);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(m.info().await.phase, RoomPhase::Active);
}

// =========================================================================
// Moves
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_move_before_active_gets_resync() {
    let mut m = new_match(test_config()).await;
    m.players[0].drain();

    m.play(0, 1, MoveAction::Down).await;

    let msgs = m.players[0].drain();
    match &msgs[..] {
        [ServerMessage::Resync { seq, full_state }] => {
            assert_eq!(*seq, 2);
            assert_eq!(full_state.phase, RoomPhase::Starting);
            assert_eq!(full_state.you.score, 0);
        }
        other => panic!("expected one resync, got {other:?}"),
    }
    assert_eq!(m.info().await.players[0].score, 0);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_move_is_rejected_with_resync() {
    let mut m = new_match(test_config()).await;
    m.start().await;

    // Skips seq 1.
    m.play(0, 2, MoveAction::Down).await;
    assert_eq!(m.info().await.players[0].score, 0);
    assert_eq!(m.players[0].kinds(), vec!["resync"]);

    m.play(0, 1, MoveAction::Down).await;
    assert_eq!(m.info().await.players[0].score, 100);

    // Replay of an applied seq.
    m.play(0, 1, MoveAction::Down).await;
    assert_eq!(m.info().await.players[0].score, 100);
    assert_eq!(m.players[0].kinds(), vec!["game_state", "resync"]);
}

#[tokio::test(start_paused = true)]
async fn test_lost_move_recovers_from_resync_seq() {
    let mut m = new_match(test_config()).await;
    m.start().await;

    m.play(0, 1, MoveAction::Down).await;
    // Seq 2 never reached the room.
    m.play(0, 3, MoveAction::Down).await;
    m.info().await;

    let last = m.players[0]
        .drain()
        .into_iter()
        .find_map(|msg| match msg {
            ServerMessage::Resync { full_state, .. } => Some(full_state.last_move_seq),
            _ => None,
        })
        .expect("rejected move pushes a resync");
    assert_eq!(last, 1);

    for seq in last + 1..=last + 4 {
        m.play(0, seq, MoveAction::Down).await;
    }
    assert_eq!(m.info().await.players[0].score, 500);
    assert!(!m.players[0].kinds().contains(&"resync"));
}

#[tokio::test(start_paused = true)]
async fn test_room_messages_carry_consecutive_seqs() {
    let mut m = new_match(test_config()).await;
    m.start().await;
    m.play(0, 1, MoveAction::Down).await;
    m.play(0, 2, MoveAction::Hold).await;
    m.play(1, 1, MoveAction::Left).await;
    m.room.request_resync(m.token(1)).await.unwrap();
    m.info().await;

    // match_found was 1, the first game_state was 2.
    let seqs: Vec<u64> = m.players[1]
        .drain()
        .iter()
        .filter_map(ServerMessage::room_seq)
        .collect();
    let expected: Vec<u64> = (3..3 + seqs.len() as u64).collect();
    assert!(seqs.len() >= 4);
    assert_eq!(seqs, expected);
}

#[tokio::test(start_paused = true)]
async fn test_attack_cancels_pending_before_reaching_opponent() {
    let mut m = new_match(test_config()).await;
    m.start().await;

    m.play(0, 1, MoveAction::Hold).await;
    let info = m.info().await;
    assert_eq!(info.players[1].board.pending_attack, 4);
    assert_eq!(info.players[0].lines_sent, 4);
    let attacks: Vec<u32> = m.players[1]
        .drain()
        .iter()
        .filter_map(|msg| match msg {
            ServerMessage::Attack { lines, .. } => Some(*lines),
            _ => None,
        })
        .collect();
    assert_eq!(attacks, vec![4]);

    // A counter-attack of equal size only cancels.
    m.play(1, 1, MoveAction::Hold).await;
    let info = m.info().await;
    assert_eq!(info.players[1].board.pending_attack, 0);
    assert_eq!(info.players[1].lines_sent, 0);
    assert_eq!(info.players[0].board.pending_attack, 0);
    assert!(!m.players[0].kinds().contains(&"attack"));
}

#[tokio::test(start_paused = true)]
async fn test_pending_garbage_lands_on_lock_without_clear() {
    let mut m = new_match(test_config()).await;
    m.start().await;

    m.play(0, 1, MoveAction::Hold).await;
    m.play(1, 1, MoveAction::RotateCcw).await;

    let board = &m.info().await.players[1].board;
    assert_eq!(board.pending_attack, 0);
    assert_eq!(board.filled_cells(), 40);
    assert!(board.grid[19].iter().all(|&c| c == CELL_GARBAGE));
    assert!(board.grid[15].iter().all(|&c| c == CELL_EMPTY));
}

#[tokio::test(start_paused = true)]
async fn test_attack_on_disconnected_opponent_is_discarded() {
    let mut m = new_match(test_config()).await;
    m.start().await;
    m.room.disconnect(m.token(1)).await.unwrap();

    m.play(0, 1, MoveAction::Hold).await;
    let info = m.info().await;
    assert_eq!(info.players[1].board.pending_attack, 0);
    assert!(!info.players[1].connected);
}

// =========================================================================
// KOs and match end
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_overflow_scores_ko_and_resets_victim_board() {
    let mut m = new_match(test_config()).await;
    m.start().await;
    m.play(1, 1, MoveAction::Hold).await;
    m.play(0, 1, MoveAction::HardDrop).await;

    let info = m.info().await;
    assert_eq!(info.phase, RoomPhase::Active);
    assert_eq!(info.players[1].ko_count, 1);
    assert_eq!(info.players[0].kos_taken, 1);
    assert_eq!(info.players[0].board.pending_attack, 0);

    for player in &mut m.players {
        let kos: Vec<(UserId, u32)> = player
            .drain()
            .iter()
            .filter_map(|msg| match msg {
                ServerMessage::Ko {
                    victim, ko_count, ..
                } => Some((*victim, *ko_count)),
                _ => None,
            })
            .collect();
        assert_eq!(kos, vec![(UserId(1), 1)]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_ko_threshold_ends_match_and_freezes_boards() {
    let mut m = new_match(RoomConfig {
        ko_threshold: 2,
        ..test_config()
    })
    .await;
    m.start().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    m.play(1, 1, MoveAction::HardDrop).await;
    m.play(1, 2, MoveAction::HardDrop).await;
    let info = m.info().await;
    assert_eq!(info.phase, RoomPhase::Ending);
    let outcome = info.outcome.expect("decided");
    assert_eq!(outcome.winner, UserId(1));
    assert_eq!(outcome.reason, MatchEndReason::KoLimit);
    assert_eq!(outcome.duration_ms, 3_000);

    let results = match_result(&m.players[1].drain());
    assert_eq!(results, vec![(UserId(1), MatchEndReason::KoLimit, 3_000)]);

    // No moves after the decision.
    m.play(0, 1, MoveAction::Down).await;
    assert_eq!(m.info().await.players[0].score, 0);
    assert_eq!(m.players[0].drain().last().map(ServerMessage::kind), Some("resync"));
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_higher_score_wins() {
    let mut m = new_match(RoomConfig {
        time_limit: Duration::from_secs(5),
        ..test_config()
    })
    .await;
    m.start().await;
    m.play(1, 1, MoveAction::Down).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let info = m.info().await;
    assert_eq!(info.phase, RoomPhase::Ending);
    assert_eq!(info.clock_remaining_ms, 0);

    let results = match_result(&m.players[0].drain());
    assert_eq!(results, vec![(UserId(2), MatchEndReason::TimeLimit, 5_000)]);
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_tie_goes_to_fewer_kos_taken() {
    let mut m = new_match(RoomConfig {
        time_limit: Duration::from_secs(5),
        ..test_config()
    })
    .await;
    m.start().await;
    // Both end on zero points; player one was knocked out once.
    m.play(0, 1, MoveAction::HardDrop).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let outcome = m.info().await.outcome.expect("decided");
    assert_eq!(outcome.winner, UserId(2));
    assert_eq!(outcome.reason, MatchEndReason::TimeLimit);
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_tie_falls_back_to_enqueue_order() {
    let mut m = new_match_with_tickets(
        RoomConfig {
            time_limit: Duration::from_secs(5),
            tie_break: TieBreak::EnqueueOrder,
            ..test_config()
        },
        [7, 3],
    )
    .await;
    m.start().await;
    m.play(1, 1, MoveAction::HardDrop).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let outcome = m.info().await.outcome.expect("decided");
    // KOs taken are ignored under this policy; the earlier ticket wins.
    assert_eq!(outcome.winner, UserId(2));
}

// =========================================================================
// Disconnect / reconnect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_restores_state() {
    let mut m = new_match(test_config()).await;
    m.start().await;
    m.play(0, 1, MoveAction::Down).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    m.room.disconnect(m.token(0)).await.unwrap();
    m.info().await;
    assert_eq!(m.players[1].kinds(), vec!["game_state", "opponent_disconnected"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    m.room.reconnect(m.token(0), tx).await.unwrap();

    match rx.try_recv().expect("resync queued") {
        ServerMessage::Resync { full_state, .. } => {
            assert_eq!(full_state.phase, RoomPhase::Active);
            assert_eq!(full_state.you.score, 100);
            assert!(full_state.opponent.connected);
            assert_eq!(full_state.clock_elapsed_ms, 15_000);
        }
        other => panic!("expected resync, got {other:?}"),
    }
    m.info().await;
    assert_eq!(m.players[1].kinds(), vec!["opponent_reconnected"]);

    // Well past the original grace window: nobody forfeits.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let info = m.info().await;
    assert_eq!(info.phase, RoomPhase::Active);
    assert!(info.players[0].connected);

    // Move numbering continues where it left off.
    m.play(0, 2, MoveAction::Down).await;
    assert_eq!(m.info().await.players[0].score, 200);
}

#[tokio::test(start_paused = true)]
async fn test_grace_expiry_forfeits_exactly_once() {
    let mut m = new_match(test_config()).await;
    m.start().await;

    m.room.disconnect(m.token(0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    // A repeated disconnect neither restarts the grace window nor adds one.
    m.room.disconnect(m.token(0)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(m.info().await.phase, RoomPhase::Ending);

    let results = match_result(&m.players[1].drain());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, UserId(2));
    assert_eq!(results[0].1, MatchEndReason::Forfeit);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_starting_forfeits_after_grace() {
    let m = new_match(RoomConfig {
        ready_timeout: Duration::from_secs(60),
        ..test_config()
    })
    .await;
    m.room.disconnect(m.token(1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(21)).await;
    let info = m.info().await;
    assert_eq!(info.phase, RoomPhase::Ending);
    assert_eq!(info.outcome.map(|o| o.winner), Some(UserId(1)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_unknown_token_is_rejected() {
    let m = new_match(test_config()).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = m
        .room
        .reconnect(SessionToken::new("stranger"), tx)
        .await
        .unwrap_err();
    assert_eq!(err, RoomError::NotInRoom);
}

// =========================================================================
// Closing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_both_acks_close_room_with_record() {
    let mut m = new_match(RoomConfig {
        ko_threshold: 1,
        ..test_config()
    })
    .await;
    m.start().await;
    m.play(0, 1, MoveAction::Down).await;
    m.play(1, 1, MoveAction::HardDrop).await;

    m.room.ack_result(m.token(0)).await.unwrap();
    assert_eq!(m.info().await.phase, RoomPhase::Ending);
    m.room.ack_result(m.token(1)).await.unwrap();

    let notice = m.notices.recv().await.expect("notice");
    let RoomNotice::Closed {
        room_id,
        record,
        tokens,
    } = notice;
    assert_eq!(room_id, m.room.room_id());
    assert_eq!(tokens, [m.token(0), m.token(1)]);
    let record = record.expect("decided match has a record");
    assert_eq!(record.winner, m.players[0].user_id);
    assert_eq!(record.loser, m.players[1].user_id);
    assert_eq!(record.winner_kos, 1);
    assert_eq!(record.loser_kos, 0);
    assert_eq!(record.reason, MatchEndReason::KoLimit);

    // The actor has exited.
    assert!(matches!(
        m.room.get_info().await,
        Err(RoomError::Unavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_ending_timeout_closes_room_without_acks() {
    let mut m = new_match(RoomConfig {
        ko_threshold: 1,
        ..test_config()
    })
    .await;
    m.start().await;
    m.play(1, 1, MoveAction::HardDrop).await;
    assert_eq!(m.info().await.phase, RoomPhase::Ending);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let RoomNotice::Closed { record, .. } = m.notices.recv().await.expect("notice");
    assert_eq!(record.map(|r| r.winner), Some(UserId(1)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_posts_notice_without_record() {
    let mut m = new_match(test_config()).await;
    m.manager.shutdown_all().await;

    let RoomNotice::Closed { record, tokens, .. } = m.notices.recv().await.expect("notice");
    assert!(record.is_none());
    assert_eq!(tokens[1], m.token(1));
}

// =========================================================================
// RoomManager
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_manager_routes_bound_tokens() {
    let mut m = new_match(test_config()).await;
    let room_id = m.room.room_id();

    assert_eq!(m.manager.room_count(), 1);
    assert_eq!(m.manager.room_ids(), vec![room_id]);
    assert_eq!(m.manager.room_for(&m.token(1)), Some(room_id));
    assert_eq!(m.manager.route(&m.token(0)).unwrap().room_id(), room_id);
    assert!(matches!(
        m.manager.route(&SessionToken::new("nobody")),
        Err(RoomError::NotInRoom)
    ));

    let (c, _pc) = seat(3, 3);
    let (d, _pd) = seat(4, 4);
    let second = m.manager.create_room([c, d], MapId::Classic);
    assert_ne!(second.room_id(), room_id);
    assert_eq!(m.manager.room_count(), 2);

    assert!(m.manager.unbind_room(room_id).is_some());
    assert!(m.manager.unbind_room(room_id).is_none());
    assert_eq!(m.manager.room_for(&m.token(0)), None);
    assert!(m.manager.handle(second.room_id()).is_some());
}
