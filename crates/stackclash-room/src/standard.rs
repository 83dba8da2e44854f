//! `StandardRules`: a compact reference board engine.
//!
//! Ten by twenty well, the seven tetrominoes, rotation with small wall
//! kicks, hold, hard drop, line clears, combos, and garbage. No gravity:
//! pieces only fall when the player moves them down, which keeps the
//! engine a pure function of its inputs.
//!
//! | Lines | Score | Attack |
//! |-------|-------|--------|
//! | 1     | 100   | 0      |
//! | 2     | 300   | 1      |
//! | 3     | 500   | 2      |
//! | 4     | 800   | 4      |
//!
//! A lock that clears lines while the combo counter is already at 2 or
//! more sends one extra line.

use stackclash_protocol::{
    ActivePiece, BOARD_HEIGHT, BOARD_WIDTH, BoardState, CELL_EMPTY, CELL_GARBAGE, CELL_OBSTACLE,
    MapId, MoveAction, PieceKind,
};

use crate::{BoardRules, GarbageOutcome, StepOutcome};

/// Upcoming pieces kept in the preview.
const PREVIEW: usize = 5;
/// Obstacle rows at the bottom of the classic map.
const CLASSIC_OBSTACLE_ROWS: usize = 4;
const LINE_SCORE: [u64; 5] = [0, 100, 300, 500, 800];
const LINE_ATTACK: [u32; 5] = [0, 0, 1, 2, 4];
/// Horizontal offsets tried, in order, when a rotation collides.
const KICKS: [i32; 5] = [0, -1, 1, -2, 2];
const FALLBACK_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// The reference engine. Stateless; all state lives in the board.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl BoardRules for StandardRules {
    fn new_board(&self, map: MapId, seed: u64) -> BoardState {
        let seed = if seed == 0 { FALLBACK_SEED } else { seed };
        let mut board = BoardState::empty(seed);
        if map == MapId::Classic {
            for i in 0..CLASSIC_OBSTACLE_ROWS {
                let row = &mut board.grid[BOARD_HEIGHT - 1 - i];
                row.fill(CELL_OBSTACLE);
                row[(i * 3 + 1) % BOARD_WIDTH] = CELL_EMPTY;
            }
        }
        refill(&mut board);
        // An empty well always has room for the first piece.
        spawn_next(&mut board);
        board
    }

    fn step(&self, board: &BoardState, action: MoveAction) -> StepOutcome {
        let mut board = board.clone();
        let Some(piece) = board.active else {
            let spawned = spawn_next(&mut board);
            return StepOutcome {
                overflow: !spawned,
                ..StepOutcome::unchanged(&board)
            };
        };

        match action {
            MoveAction::Left => shift(board, piece, -1),
            MoveAction::Right => shift(board, piece, 1),
            MoveAction::RotateCw => rotate(board, piece, 1),
            MoveAction::RotateCcw => rotate(board, piece, 3),
            MoveAction::Down => {
                let lower = ActivePiece {
                    row: piece.row + 1,
                    ..piece
                };
                if fits(&board.grid, &lower) {
                    board.active = Some(lower);
                    StepOutcome::unchanged(&board)
                } else {
                    lock(board, piece)
                }
            }
            MoveAction::HardDrop => {
                let mut landed = piece;
                loop {
                    let lower = ActivePiece {
                        row: landed.row + 1,
                        ..landed
                    };
                    if !fits(&board.grid, &lower) {
                        break;
                    }
                    landed = lower;
                }
                lock(board, landed)
            }
            MoveAction::Hold => hold(board, piece),
        }
    }

    fn add_garbage(&self, board: &BoardState, lines: u32) -> GarbageOutcome {
        let mut board = board.clone();
        let lines = (lines as usize).min(BOARD_HEIGHT);
        let pushed_out = board.grid[..lines]
            .iter()
            .any(|row| row.iter().any(|&cell| cell != CELL_EMPTY));

        board.grid.drain(..lines);
        for _ in 0..lines {
            let hole = (next_random(&mut board.rng_state) % BOARD_WIDTH as u64) as usize;
            let mut row = vec![CELL_GARBAGE; BOARD_WIDTH];
            row[hole] = CELL_EMPTY;
            board.grid.push(row);
        }

        let blocked = board.active.is_some_and(|p| !fits(&board.grid, &p));
        GarbageOutcome {
            board,
            overflow: pushed_out || blocked,
        }
    }
}

// ---------------------------------------------------------------------------
// Pieces
// ---------------------------------------------------------------------------

/// Bounding box size and rotation-0 cells (row, col) of each kind.
fn shape(kind: PieceKind) -> (i32, [(i32, i32); 4]) {
    match kind {
        PieceKind::I => (4, [(1, 0), (1, 1), (1, 2), (1, 3)]),
        PieceKind::O => (2, [(0, 0), (0, 1), (1, 0), (1, 1)]),
        PieceKind::T => (3, [(0, 1), (1, 0), (1, 1), (1, 2)]),
        PieceKind::S => (3, [(0, 1), (0, 2), (1, 0), (1, 1)]),
        PieceKind::Z => (3, [(0, 0), (0, 1), (1, 1), (1, 2)]),
        PieceKind::J => (3, [(0, 0), (1, 0), (1, 1), (1, 2)]),
        PieceKind::L => (3, [(0, 2), (1, 0), (1, 1), (1, 2)]),
    }
}

/// Absolute cells of a piece, rotating clockwise inside its box.
fn cells(piece: &ActivePiece) -> [(i32, i32); 4] {
    let (size, mut out) = shape(piece.kind);
    for cell in &mut out {
        let (mut r, mut c) = *cell;
        for _ in 0..(piece.rotation % 4) {
            (r, c) = (c, size - 1 - r);
        }
        *cell = (piece.row + r, piece.col + c);
    }
    out
}

fn fits(grid: &[Vec<u8>], piece: &ActivePiece) -> bool {
    cells(piece).iter().all(|&(r, c)| {
        (0..BOARD_HEIGHT as i32).contains(&r)
            && (0..BOARD_WIDTH as i32).contains(&c)
            && grid[r as usize][c as usize] == CELL_EMPTY
    })
}

fn next_random(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn refill(board: &mut BoardState) {
    while board.next.len() < PREVIEW {
        let roll = next_random(&mut board.rng_state) % PieceKind::ALL.len() as u64;
        board.next.push(PieceKind::ALL[roll as usize]);
    }
}

/// Places `kind` at the spawn position. Returns `false` if it collides.
fn spawn(board: &mut BoardState, kind: PieceKind) -> bool {
    let (size, _) = shape(kind);
    let piece = ActivePiece {
        kind,
        rotation: 0,
        row: 0,
        col: (BOARD_WIDTH as i32 - size) / 2,
    };
    board.active = Some(piece);
    fits(&board.grid, &piece)
}

fn spawn_next(board: &mut BoardState) -> bool {
    refill(board);
    let kind = board.next.remove(0);
    refill(board);
    spawn(board, kind)
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn shift(mut board: BoardState, piece: ActivePiece, dc: i32) -> StepOutcome {
    let moved = ActivePiece {
        col: piece.col + dc,
        ..piece
    };
    if fits(&board.grid, &moved) {
        board.active = Some(moved);
    }
    StepOutcome::unchanged(&board)
}

fn rotate(mut board: BoardState, piece: ActivePiece, quarter_turns: u8) -> StepOutcome {
    let rotation = (piece.rotation + quarter_turns) % 4;
    for dc in KICKS {
        let candidate = ActivePiece {
            rotation,
            col: piece.col + dc,
            ..piece
        };
        if fits(&board.grid, &candidate) {
            board.active = Some(candidate);
            break;
        }
    }
    StepOutcome::unchanged(&board)
}

fn hold(mut board: BoardState, piece: ActivePiece) -> StepOutcome {
    if board.hold_used {
        return StepOutcome::unchanged(&board);
    }
    board.hold_used = true;
    let spawned = match board.hold.replace(piece.kind) {
        Some(held) => spawn(&mut board, held),
        None => spawn_next(&mut board),
    };
    StepOutcome {
        overflow: !spawned,
        ..StepOutcome::unchanged(&board)
    }
}

fn lock(mut board: BoardState, piece: ActivePiece) -> StepOutcome {
    for (r, c) in cells(&piece) {
        board.grid[r as usize][c as usize] = piece.kind.cell();
    }
    board.active = None;
    board.hold_used = false;

    let lines = clear_lines(&mut board.grid);
    let attack = if lines > 0 {
        let bonus = u32::from(board.combo >= 2);
        board.combo += 1;
        LINE_ATTACK[lines.min(4)] + bonus
    } else {
        board.combo = 0;
        0
    };
    let score = LINE_SCORE[lines.min(4)];
    let spawned = spawn_next(&mut board);

    StepOutcome {
        board,
        locked: true,
        lines_cleared: lines as u32,
        attack,
        score,
        overflow: !spawned,
    }
}

fn clear_lines(grid: &mut Vec<Vec<u8>>) -> usize {
    let before = grid.len();
    grid.retain(|row| row.contains(&CELL_EMPTY));
    let cleared = before - grid.len();
    for _ in 0..cleared {
        grid.insert(0, vec![CELL_EMPTY; BOARD_WIDTH]);
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> BoardState {
        StandardRules.new_board(MapId::Standard, 42)
    }

    /// A board whose active piece is `kind` at the given placement.
    fn with_piece(kind: PieceKind, rotation: u8, row: i32, col: i32) -> BoardState {
        let mut b = board();
        b.active = Some(ActivePiece {
            kind,
            rotation,
            row,
            col,
        });
        b
    }

    fn fill_row_except(b: &mut BoardState, row: usize, gaps: &[usize]) {
        for c in 0..BOARD_WIDTH {
            b.grid[row][c] = if gaps.contains(&c) {
                CELL_EMPTY
            } else {
                CELL_GARBAGE
            };
        }
    }

    #[test]
    fn test_new_board_has_piece_and_preview() {
        let b = board();
        assert!(b.active.is_some());
        assert_eq!(b.next.len(), PREVIEW);
        assert_eq!(b.filled_cells(), 0);
        assert_eq!(b.pending_attack, 0);
    }

    #[test]
    fn test_new_board_same_seed_is_identical() {
        assert_eq!(
            StandardRules.new_board(MapId::Standard, 7),
            StandardRules.new_board(MapId::Standard, 7)
        );
    }

    #[test]
    fn test_new_board_classic_has_obstacle_floor() {
        let b = StandardRules.new_board(MapId::Classic, 7);
        let obstacles = b
            .grid
            .iter()
            .flatten()
            .filter(|&&cell| cell == CELL_OBSTACLE)
            .count();
        assert_eq!(obstacles, CLASSIC_OBSTACLE_ROWS * (BOARD_WIDTH - 1));
    }

    #[test]
    fn test_cells_rotation_keeps_four_blocks_in_box() {
        for kind in PieceKind::ALL {
            let (size, _) = shape(kind);
            for rotation in 0..4 {
                let piece = ActivePiece {
                    kind,
                    rotation,
                    row: 0,
                    col: 0,
                };
                for (r, c) in cells(&piece) {
                    assert!((0..size).contains(&r) && (0..size).contains(&c));
                }
            }
        }
    }

    #[test]
    fn test_step_left_stops_at_wall() {
        let mut b = board();
        for _ in 0..BOARD_WIDTH {
            b = StandardRules.step(&b, MoveAction::Left).board;
        }
        let piece = b.active.unwrap();
        let min_col = cells(&piece).iter().map(|&(_, c)| c).min().unwrap();
        assert_eq!(min_col, 0);
    }

    #[test]
    fn test_step_hard_drop_locks_and_spawns_next() {
        let b = board();
        let upcoming = b.next[0];
        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert!(out.locked);
        assert!(!out.overflow);
        assert_eq!(out.board.filled_cells(), 4);
        assert_eq!(out.board.active.unwrap().kind, upcoming);
        assert_eq!(out.board.next.len(), PREVIEW);
    }

    #[test]
    fn test_step_soft_drop_at_floor_locks() {
        let b = with_piece(PieceKind::O, 0, 18, 4);
        let out = StandardRules.step(&b, MoveAction::Down);
        assert!(out.locked);
        assert_eq!(out.board.grid[19][4], PieceKind::O.cell());
    }

    #[test]
    fn test_step_single_line_clear_scores_without_attack() {
        let mut b = with_piece(PieceKind::I, 0, 0, 3);
        fill_row_except(&mut b, BOARD_HEIGHT - 1, &[3, 4, 5, 6]);

        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert_eq!(out.lines_cleared, 1);
        assert_eq!(out.score, 100);
        assert_eq!(out.attack, 0);
        assert_eq!(out.board.combo, 1);
        assert_eq!(out.board.filled_cells(), 0);
    }

    #[test]
    fn test_step_four_lines_sends_four() {
        // Vertical I: rotation 1 puts the blocks in box column 2.
        let mut b = with_piece(PieceKind::I, 1, 0, -2);
        for row in BOARD_HEIGHT - 4..BOARD_HEIGHT {
            fill_row_except(&mut b, row, &[0]);
        }

        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert_eq!(out.lines_cleared, 4);
        assert_eq!(out.score, 800);
        assert_eq!(out.attack, 4);
    }

    #[test]
    fn test_step_combo_adds_bonus_line() {
        let mut b = with_piece(PieceKind::I, 0, 0, 3);
        b.combo = 2;
        fill_row_except(&mut b, BOARD_HEIGHT - 1, &[3, 4, 5, 6]);
        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert_eq!(out.attack, 1, "single clear plus combo bonus");
        assert_eq!(out.board.combo, 3);
    }

    #[test]
    fn test_step_lock_without_clear_resets_combo() {
        let mut b = board();
        b.combo = 4;
        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert_eq!(out.lines_cleared, 0);
        assert_eq!(out.board.combo, 0);
    }

    #[test]
    fn test_step_hold_only_once_per_piece() {
        let b = board();
        let first = b.active.unwrap().kind;
        let held = StandardRules.step(&b, MoveAction::Hold).board;
        assert_eq!(held.hold, Some(first));
        assert!(held.hold_used);

        let again = StandardRules.step(&held, MoveAction::Hold);
        assert_eq!(again.board, held);
    }

    #[test]
    fn test_step_blocked_spawn_is_overflow() {
        let mut b = board();
        for row in 2..BOARD_HEIGHT {
            fill_row_except(&mut b, row, &[9]);
        }
        let out = StandardRules.step(&b, MoveAction::HardDrop);
        assert!(out.locked);
        assert!(out.overflow);
    }

    #[test]
    fn test_add_garbage_raises_rows_with_one_hole() {
        let b = board();
        let out = StandardRules.add_garbage(&b, 2);
        assert!(!out.overflow);
        for row in &out.board.grid[BOARD_HEIGHT - 2..] {
            assert_eq!(row.iter().filter(|&&c| c == CELL_EMPTY).count(), 1);
            assert_eq!(row.iter().filter(|&&c| c == CELL_GARBAGE).count(), 9);
        }
        assert_eq!(out.board.grid.len(), BOARD_HEIGHT);
    }

    #[test]
    fn test_add_garbage_pushing_blocks_out_is_overflow() {
        let mut b = board();
        b.grid[0][0] = CELL_GARBAGE;
        assert!(StandardRules.add_garbage(&b, 1).overflow);
    }
}
