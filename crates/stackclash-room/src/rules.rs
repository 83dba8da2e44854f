//! The `BoardRules` trait: the board engine as seen by a room.
//!
//! A room never mutates a board itself. It hands the current board and a
//! player's input to the rules and keeps whatever comes back, so the
//! engine must be a pure function of its inputs. Both players' boards are
//! created from the same seed, which makes the piece sequence fair.

use stackclash_protocol::{BoardState, MapId, MoveAction};

/// Result of applying one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub board: BoardState,
    /// The active piece came to rest this step.
    pub locked: bool,
    pub lines_cleared: u32,
    /// Garbage lines this lock sends, before cancelling pending attack.
    pub attack: u32,
    /// Points earned by this step.
    pub score: u64,
    /// The next piece could not spawn: a KO.
    pub overflow: bool,
}

impl StepOutcome {
    /// An input that changed nothing.
    pub fn unchanged(board: &BoardState) -> Self {
        Self {
            board: board.clone(),
            locked: false,
            lines_cleared: 0,
            attack: 0,
            score: 0,
            overflow: false,
        }
    }
}

/// Result of pushing garbage into a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarbageOutcome {
    pub board: BoardState,
    /// Blocks were pushed out of the top, or the active piece no longer fits.
    pub overflow: bool,
}

/// A deterministic board engine.
///
/// The room owns the clock, sequencing and scoring of the match. The rules
/// only answer "what does this board look like after this input?". Every
/// method takes the board by reference and returns a new one, so a room
/// can keep the previous board until it decides to commit the result.
///
/// Given the same map, seed and inputs, an implementation must produce the
/// same boards. Resyncs and the outcome of a match both rely on that.
///
/// # Trait bounds
///
/// `Send + Sync + 'static`: one instance is shared (behind an `Arc`) by
/// every room task, and those tasks run on any runtime thread.
///
/// # Implementing
///
/// [`StandardRules`](crate::StandardRules) is the engine the server ships with. A custom engine
/// plugs in through `StackClashServerBuilder::build_with_transport`:
///
/// ```rust,ignore
/// struct NoGarbage(StandardRules);
///
/// impl BoardRules for NoGarbage {
///     fn new_board(&self, map: MapId, seed: u64) -> BoardState {
///         self.0.new_board(map, seed)
///     }
///     fn step(&self, board: &BoardState, action: MoveAction) -> StepOutcome {
///         self.0.step(board, action)
///     }
///     fn add_garbage(&self, board: &BoardState, _lines: u32) -> GarbageOutcome {
///         GarbageOutcome { board: board.clone(), overflow: false }
///     }
/// }
/// ```
pub trait BoardRules: Send + Sync + 'static {
    /// A fresh board for `map`, with its piece generator seeded by `seed`.
    fn new_board(&self, map: MapId, seed: u64) -> BoardState;

    /// Applies one input.
    fn step(&self, board: &BoardState, action: MoveAction) -> StepOutcome;

    /// Raises `lines` garbage rows from the bottom.
    fn add_garbage(&self, board: &BoardState, lines: u32) -> GarbageOutcome;
}
