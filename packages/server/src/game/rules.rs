//! Board representations and move legality.
//!
//! One closed enum covers every supported game; adding a game means
//! adding a variant here and its arms below, and the compiler walks you
//! through every site that must learn about it.

use serde_json::{Value, json};
use undertow_shared::protocol::GameType;

use crate::error::GameError;

/// Which side a participant plays. The room creator is always `X`
/// (black, for othello) and moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Mark::X => "x",
            Mark::O => "o",
        }
    }
}

/// Result of a finished board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardOutcome {
    Win(Mark),
    Draw,
}

const OTHELLO_SIZE: usize = 8;
const DIRECTIONS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Board {
    TicTacToe([[Option<Mark>; 3]; 3]),
    Othello([[Option<Mark>; OTHELLO_SIZE]; OTHELLO_SIZE]),
}

/// A move as sent by clients: `{"row": r, "col": c}`.
fn parse_cell(data: &Value, size: usize) -> Result<(usize, usize), GameError> {
    let row = data
        .get("row")
        .and_then(Value::as_u64)
        .ok_or_else(|| GameError::IllegalMove("move needs a numeric \"row\"".into()))?;
    let col = data
        .get("col")
        .and_then(Value::as_u64)
        .ok_or_else(|| GameError::IllegalMove("move needs a numeric \"col\"".into()))?;
    if row as usize >= size || col as usize >= size {
        return Err(GameError::IllegalMove(format!(
            "cell ({row}, {col}) is outside the {size}x{size} board"
        )));
    }
    Ok((row as usize, col as usize))
}

impl Board {
    pub fn new(game: GameType) -> Self {
        match game {
            GameType::TicTacToe => Board::TicTacToe(Default::default()),
            GameType::Othello => {
                let mut grid: [[Option<Mark>; OTHELLO_SIZE]; OTHELLO_SIZE] = Default::default();
                grid[3][3] = Some(Mark::O);
                grid[3][4] = Some(Mark::X);
                grid[4][3] = Some(Mark::X);
                grid[4][4] = Some(Mark::O);
                Board::Othello(grid)
            }
        }
    }

    /// Validates and applies one move for `mark`.
    pub fn apply(&mut self, mark: Mark, data: &Value) -> Result<(), GameError> {
        match self {
            Board::TicTacToe(grid) => {
                let (row, col) = parse_cell(data, 3)?;
                if grid[row][col].is_some() {
                    return Err(GameError::IllegalMove(format!(
                        "cell ({row}, {col}) is already taken"
                    )));
                }
                grid[row][col] = Some(mark);
                Ok(())
            }
            Board::Othello(grid) => {
                let (row, col) = parse_cell(data, OTHELLO_SIZE)?;
                let flips = othello_flips(grid, mark, row, col);
                if flips.is_empty() {
                    return Err(GameError::IllegalMove(format!(
                        "placing at ({row}, {col}) captures nothing"
                    )));
                }
                grid[row][col] = Some(mark);
                for (r, c) in flips {
                    grid[r][c] = Some(mark);
                }
                Ok(())
            }
        }
    }

    /// Whether `mark` has at least one legal move. Drives the othello
    /// forced-pass rule.
    pub fn has_any_move(&self, mark: Mark) -> bool {
        match self {
            Board::TicTacToe(grid) => grid.iter().flatten().any(Option::is_none),
            Board::Othello(grid) => (0..OTHELLO_SIZE).any(|row| {
                (0..OTHELLO_SIZE).any(|col| !othello_flips(grid, mark, row, col).is_empty())
            }),
        }
    }

    /// `None` while the game continues.
    pub fn outcome(&self) -> Option<BoardOutcome> {
        match self {
            Board::TicTacToe(grid) => {
                for mark in [Mark::X, Mark::O] {
                    if tictactoe_has_line(grid, mark) {
                        return Some(BoardOutcome::Win(mark));
                    }
                }
                if grid.iter().flatten().all(Option::is_some) {
                    Some(BoardOutcome::Draw)
                } else {
                    None
                }
            }
            Board::Othello(_) => {
                if self.has_any_move(Mark::X) || self.has_any_move(Mark::O) {
                    return None;
                }
                let (x, o) = self.disc_counts();
                match x.cmp(&o) {
                    std::cmp::Ordering::Greater => Some(BoardOutcome::Win(Mark::X)),
                    std::cmp::Ordering::Less => Some(BoardOutcome::Win(Mark::O)),
                    std::cmp::Ordering::Equal => Some(BoardOutcome::Draw),
                }
            }
        }
    }

    pub fn disc_counts(&self) -> (usize, usize) {
        fn count<const N: usize>(grid: &[[Option<Mark>; N]; N]) -> (usize, usize) {
            let mut x = 0;
            let mut o = 0;
            for cell in grid.iter().flatten() {
                match cell {
                    Some(Mark::X) => x += 1,
                    Some(Mark::O) => o += 1,
                    None => {}
                }
            }
            (x, o)
        }
        match self {
            Board::TicTacToe(grid) => count(grid),
            Board::Othello(grid) => count(grid),
        }
    }

    /// Game-specific JSON pushed inside every snapshot: a grid of
    /// `"x"`, `"o"`, or `null`.
    pub fn to_json(&self) -> Value {
        fn rows<const N: usize>(grid: &[[Option<Mark>; N]; N]) -> Value {
            Value::Array(
                grid.iter()
                    .map(|row| {
                        Value::Array(
                            row.iter()
                                .map(|cell| match cell {
                                    Some(mark) => json!(mark.as_str()),
                                    None => Value::Null,
                                })
                                .collect(),
                        )
                    })
                    .collect(),
            )
        }
        match self {
            Board::TicTacToe(grid) => rows(grid),
            Board::Othello(grid) => rows(grid),
        }
    }
}

fn tictactoe_has_line(grid: &[[Option<Mark>; 3]; 3], mark: Mark) -> bool {
    let at = |r: usize, c: usize| grid[r][c] == Some(mark);
    (0..3).any(|i| (at(i, 0) && at(i, 1) && at(i, 2)) || (at(0, i) && at(1, i) && at(2, i)))
        || (at(0, 0) && at(1, 1) && at(2, 2))
        || (at(0, 2) && at(1, 1) && at(2, 0))
}

/// Cells captured by placing `mark` at `(row, col)`. Empty when the
/// placement is illegal (occupied cell or no capture in any direction).
fn othello_flips(
    grid: &[[Option<Mark>; OTHELLO_SIZE]; OTHELLO_SIZE],
    mark: Mark,
    row: usize,
    col: usize,
) -> Vec<(usize, usize)> {
    if grid[row][col].is_some() {
        return Vec::new();
    }
    let mut flips = Vec::new();
    for (dr, dc) in DIRECTIONS {
        let mut run = Vec::new();
        let mut r = row as i32 + dr;
        let mut c = col as i32 + dc;
        while (0..OTHELLO_SIZE as i32).contains(&r) && (0..OTHELLO_SIZE as i32).contains(&c) {
            match grid[r as usize][c as usize] {
                Some(m) if m == mark.other() => run.push((r as usize, c as usize)),
                Some(_) => {
                    // Own disc closes the run; everything between flips.
                    flips.extend(run);
                    break;
                }
                None => break,
            }
            r += dr;
            c += dc;
        }
    }
    flips
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(row: usize, col: usize) -> Value {
        json!({ "row": row, "col": col })
    }

    #[test]
    fn tictactoe_rejects_taken_and_out_of_bounds_cells() {
        let mut board = Board::new(GameType::TicTacToe);
        board.apply(Mark::X, &mv(1, 1)).unwrap();

        assert!(matches!(
            board.apply(Mark::O, &mv(1, 1)),
            Err(GameError::IllegalMove(_))
        ));
        assert!(matches!(
            board.apply(Mark::O, &mv(3, 0)),
            Err(GameError::IllegalMove(_))
        ));
        assert!(matches!(
            board.apply(Mark::O, &json!({ "row": 1 })),
            Err(GameError::IllegalMove(_))
        ));
    }

    #[test]
    fn tictactoe_detects_row_column_and_diagonal_wins() {
        let mut rows = Board::new(GameType::TicTacToe);
        for col in 0..3 {
            rows.apply(Mark::X, &mv(0, col)).unwrap();
        }
        assert_eq!(rows.outcome(), Some(BoardOutcome::Win(Mark::X)));

        let mut diagonal = Board::new(GameType::TicTacToe);
        for i in 0..3 {
            diagonal.apply(Mark::O, &mv(i, i)).unwrap();
        }
        assert_eq!(diagonal.outcome(), Some(BoardOutcome::Win(Mark::O)));
    }

    #[test]
    fn tictactoe_full_board_without_line_is_a_draw() {
        let mut board = Board::new(GameType::TicTacToe);
        // x o x / x o o / o x x
        let placements = [
            (Mark::X, 0, 0),
            (Mark::O, 0, 1),
            (Mark::X, 0, 2),
            (Mark::X, 1, 0),
            (Mark::O, 1, 1),
            (Mark::O, 1, 2),
            (Mark::O, 2, 0),
            (Mark::X, 2, 1),
            (Mark::X, 2, 2),
        ];
        for (mark, row, col) in placements {
            board.apply(mark, &mv(row, col)).unwrap();
        }
        assert_eq!(board.outcome(), Some(BoardOutcome::Draw));
    }

    #[test]
    fn othello_opening_position_and_first_capture() {
        let mut board = Board::new(GameType::Othello);
        assert_eq!(board.disc_counts(), (2, 2));
        assert!(board.outcome().is_none());

        // Standard opening for black: (2, 3) flips the white disc at
        // (3, 3).
        board.apply(Mark::X, &mv(2, 3)).unwrap();
        assert_eq!(board.disc_counts(), (4, 1));
    }

    #[test]
    fn othello_rejects_captureless_placement() {
        let mut board = Board::new(GameType::Othello);
        assert!(matches!(
            board.apply(Mark::X, &mv(0, 0)),
            Err(GameError::IllegalMove(_))
        ));
        // Occupied center cell.
        assert!(matches!(
            board.apply(Mark::X, &mv(3, 3)),
            Err(GameError::IllegalMove(_))
        ));
    }

    #[test]
    fn othello_flips_along_multiple_directions() {
        let mut grid: [[Option<Mark>; 8]; 8] = Default::default();
        // x o _ o x on row 4: placing at (4, 2) captures both runs.
        grid[4][0] = Some(Mark::X);
        grid[4][1] = Some(Mark::O);
        grid[4][3] = Some(Mark::O);
        grid[4][4] = Some(Mark::X);
        let mut board = Board::Othello(grid);

        board.apply(Mark::X, &mv(4, 2)).unwrap();
        assert_eq!(board.disc_counts(), (5, 0));
    }

    #[test]
    fn othello_open_run_does_not_flip() {
        let mut grid: [[Option<Mark>; 8]; 8] = Default::default();
        // o run with no closing x disc.
        grid[4][1] = Some(Mark::O);
        grid[4][2] = Some(Mark::O);
        let board = Board::Othello(grid);
        assert!(othello_flips(
            match &board {
                Board::Othello(g) => g,
                _ => unreachable!(),
            },
            Mark::X,
            4,
            0,
        )
        .is_empty());
    }

    #[test]
    fn othello_counts_decide_the_winner_when_neither_side_can_move() {
        let mut grid: [[Option<Mark>; 8]; 8] = Default::default();
        for row in 0..8 {
            for col in 0..8 {
                grid[row][col] = Some(if row < 5 { Mark::X } else { Mark::O });
            }
        }
        let board = Board::Othello(grid);
        assert!(!board.has_any_move(Mark::X));
        assert!(!board.has_any_move(Mark::O));
        assert_eq!(board.outcome(), Some(BoardOutcome::Win(Mark::X)));
    }

    #[test]
    fn forced_pass_is_detectable_mid_game() {
        let mut grid: [[Option<Mark>; 8]; 8] = Default::default();
        // Black's run on the top edge leaves white nothing to close,
        // while black can still capture the white disc at (0, 5).
        grid[0][5] = Some(Mark::O);
        grid[0][6] = Some(Mark::X);
        grid[0][7] = Some(Mark::X);
        let board = Board::Othello(grid);
        assert!(board.has_any_move(Mark::X));
        assert!(!board.has_any_move(Mark::O));
        assert!(board.outcome().is_none());
    }

    #[test]
    fn board_json_is_a_grid_of_marks() {
        let mut board = Board::new(GameType::TicTacToe);
        board.apply(Mark::X, &mv(0, 0)).unwrap();
        board.apply(Mark::O, &mv(1, 1)).unwrap();
        let json = board.to_json();
        assert_eq!(json[0][0], "x");
        assert_eq!(json[1][1], "o");
        assert_eq!(json[2][2], Value::Null);
    }
}
