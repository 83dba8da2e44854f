//! Value types that travel on the wire.
//!
//! Identity newtypes, player and board views, map and move vocabularies,
//! and the match result record handed to persistence.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A registered account's identifier.
///
/// `#[serde(transparent)]` keeps it a plain number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// A unique identifier for one match room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Opaque session credential issued on login.
///
/// Possession of the token is the only proof of identity on `reconnect`.
/// `Display` prints a short prefix so tokens can be logged without
/// leaking them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a raw token string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The full token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "{prefix}…")
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Win/loss record and rating. Rating is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub wins: u32,
    pub losses: u32,
    pub rating: i32,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            wins: 0,
            losses: 0,
            rating: 1000,
        }
    }
}

/// Public account details shown to the player and their opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub username: String,
    pub stats: PlayerStats,
}

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

/// What a player asked for when joining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapPreference {
    /// Empty well. Older clients send `"none"` for this.
    #[serde(alias = "none")]
    Standard,
    /// Well with a fixed obstacle floor.
    Classic,
    /// Either map, picked when the room is created.
    Random,
    #[default]
    NoPreference,
}

impl MapPreference {
    /// Two preferences can share a room when they are equal or either
    /// side does not care.
    pub fn is_compatible(self, other: Self) -> bool {
        self == other || self == Self::NoPreference || other == Self::NoPreference
    }
}

/// The map a room actually plays on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapId {
    Standard,
    Classic,
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Classic => write!(f, "classic"),
        }
    }
}

// ---------------------------------------------------------------------------
// Moves and board
// ---------------------------------------------------------------------------

/// One player input. The room replays these through the rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    Left,
    Right,
    Down,
    RotateCw,
    RotateCcw,
    HardDrop,
    Hold,
}

/// The seven tetromino kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl PieceKind {
    /// Every kind, in bag order.
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::T,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
    ];

    /// The grid cell value a locked block of this kind leaves behind.
    pub fn cell(self) -> u8 {
        match self {
            Self::I => 1,
            Self::O => 2,
            Self::T => 3,
            Self::S => 4,
            Self::Z => 5,
            Self::J => 6,
            Self::L => 7,
        }
    }
}

/// Columns in the well.
pub const BOARD_WIDTH: usize = 10;
/// Rows in the well.
pub const BOARD_HEIGHT: usize = 20;
/// Grid value for an empty cell.
pub const CELL_EMPTY: u8 = 0;
/// Grid value for a garbage line cell.
pub const CELL_GARBAGE: u8 = 8;
/// Grid value for a map obstacle.
pub const CELL_OBSTACLE: u8 = 9;

/// The falling piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePiece {
    pub kind: PieceKind,
    /// Quarter turns clockwise, 0..4.
    pub rotation: u8,
    /// Row of the piece's bounding box top edge (0 is the top of the well).
    pub row: i32,
    /// Column of the bounding box left edge.
    pub col: i32,
}

/// One player's well and everything needed to step it deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    /// `BOARD_HEIGHT` rows of `BOARD_WIDTH` cells, top row first.
    pub grid: Vec<Vec<u8>>,
    pub active: Option<ActivePiece>,
    pub hold: Option<PieceKind>,
    /// Hold may be used once per dropped piece.
    pub hold_used: bool,
    /// Upcoming pieces, nearest first.
    pub next: Vec<PieceKind>,
    /// Garbage lines queued against this board, not yet merged.
    pub pending_attack: u32,
    /// Consecutive locks that cleared at least one line.
    pub combo: u32,
    /// Piece generator state.
    pub rng_state: u64,
}

impl BoardState {
    /// An empty well with no piece yet.
    pub fn empty(rng_state: u64) -> Self {
        Self {
            grid: vec![vec![CELL_EMPTY; BOARD_WIDTH]; BOARD_HEIGHT],
            active: None,
            hold: None,
            hold_used: false,
            next: Vec::new(),
            pending_attack: 0,
            combo: 0,
            rng_state,
        }
    }

    /// Number of non-empty cells. Handy in assertions and logs.
    pub fn filled_cells(&self) -> usize {
        self.grid
            .iter()
            .flatten()
            .filter(|&&cell| cell != CELL_EMPTY)
            .count()
    }
}

/// One player as the room sees them, from some viewer's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub user_id: UserId,
    pub username: String,
    pub board: BoardState,
    pub score: u64,
    /// KOs this player has scored against the opponent.
    pub ko_count: u32,
    /// Times this player's board overflowed.
    pub kos_taken: u32,
    /// Garbage lines this player has sent in total.
    pub lines_sent: u32,
    pub connected: bool,
}

// ---------------------------------------------------------------------------
// Room lifecycle
// ---------------------------------------------------------------------------

/// The lifecycle phase of a match room.
///
/// Transitions are strictly ordered and never revisited:
///
/// ```text
/// Starting → Active → Ending → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// Both players notified, waiting for ready or the ready timeout.
    Starting,
    /// Moves accepted, clock running.
    Active,
    /// A win condition fired; result broadcast, waiting for acks.
    Ending,
    /// Result persisted, players unbound.
    Closed,
}

impl RoomPhase {
    /// The only phase this one may move to.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Starting => Some(Self::Active),
            Self::Active => Some(Self::Ending),
            Self::Ending => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    ///
    /// `Starting → Ending` is allowed as well: a player can forfeit before
    /// the match ever goes live.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (self == Self::Starting && target == Self::Ending)
    }

    /// Returns `true` while the match result is still open.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }
}

impl fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Active => write!(f, "Active"),
            Self::Ending => write!(f, "Ending"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a match ended. These are the only three ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEndReason {
    KoLimit,
    TimeLimit,
    Forfeit,
}

impl fmt::Display for MatchEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KoLimit => write!(f, "ko_limit"),
            Self::TimeLimit => write!(f, "time_limit"),
            Self::Forfeit => write!(f, "forfeit"),
        }
    }
}

/// The decided result of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub winner: UserId,
    pub winner_name: String,
    pub reason: MatchEndReason,
    pub duration_ms: u64,
}

/// Full authoritative state of a room for one player, sent on `resync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub room_id: RoomId,
    pub map: MapId,
    pub phase: RoomPhase,
    pub you: PlayerView,
    pub opponent: PlayerView,
    /// Last `move` seq the room applied for this player. The next move
    /// must carry `last_move_seq + 1`.
    pub last_move_seq: u64,
    pub clock_elapsed_ms: u64,
    pub clock_remaining_ms: u64,
    pub outcome: Option<MatchOutcome>,
}

/// What persistence receives once a room closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub room_id: RoomId,
    pub map: MapId,
    pub winner: UserId,
    pub loser: UserId,
    pub reason: MatchEndReason,
    pub duration_ms: u64,
    pub winner_kos: u32,
    pub loser_kos: u32,
}

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

/// Queue status reported after `find_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Searching,
}

/// Which layer rejected a request, carried by `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Protocol,
    Auth,
    Queue,
    Room,
    /// The server failed; the request may be retried.
    Internal,
}
