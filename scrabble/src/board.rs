//! The 15×15 board: placement legality, premium scoring, word extraction,
//! blank resolution and undo of the most recent move.

use std::collections::HashSet;
use std::fmt;

use crate::moves::Move;
use crate::pos::{BOARD_SIZE, Pos};
use crate::tile::Tile;

/// Premium value of a board square. Letter premiums multiply a single tile,
/// word premiums the whole word; both count only for newly placed tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Premium {
    Plain,
    DoubleLetter,
    TripleLetter,
    DoubleWord,
    TripleWord,
}

/// The standard premium layout. The board is symmetric under reflection
/// along both axes and both diagonals, so each square folds onto an
/// unordered coordinate pair in the upper-left quadrant.
fn premium(pos: Pos) -> Premium {
    let r = pos.row.min(BOARD_SIZE - 1 - pos.row);
    let c = pos.col.min(BOARD_SIZE - 1 - pos.col);
    match (r.min(c), r.max(c)) {
        (0, 0) | (0, 7) => Premium::TripleWord,
        (1, 1) | (2, 2) | (3, 3) | (4, 4) | (7, 7) => Premium::DoubleWord,
        (1, 5) | (5, 5) => Premium::TripleLetter,
        (0, 3) | (2, 6) | (3, 7) | (6, 6) => Premium::DoubleLetter,
        _ => Premium::Plain,
    }
}

/// Bonus for playing all seven rack tiles in one move.
const BINGO_BONUS: u32 = 50;

/// What one committed move left behind, enough to score it, challenge it and
/// take it back again.
#[derive(Debug, Clone)]
struct PlayRecord {
    /// Newly placed positions in board order.
    positions: Vec<Pos>,
    /// True if the move ran along a row.
    horizontal: bool,
    score: u32,
    words: Vec<String>,
}

#[derive(Debug)]
pub struct Board {
    grid: [[Option<Tile>; BOARD_SIZE as usize]; BOARD_SIZE as usize],
    history: Vec<PlayRecord>,
}

impl Board {
    pub fn new() -> Board {
        Board { grid: [[None; BOARD_SIZE as usize]; BOARD_SIZE as usize], history: Vec::new() }
    }

    pub fn get_tile(&self, pos: Pos) -> Option<Tile> {
        self.grid[pos.row as usize][pos.col as usize]
    }

    /// Number of moves currently on the board.
    pub fn n_of_moves(&self) -> usize {
        self.history.len()
    }

    /// Score of the most recent move, 0 if the board is empty.
    pub fn get_score(&self) -> u32 {
        self.history.last().map(|r| r.score).unwrap_or(0)
    }

    /// The words formed by the most recent move. Unresolved blanks show as
    /// `?` until `set_blanks` runs.
    pub fn get_challenge_words(&self) -> Vec<String> {
        self.history.last().map(|r| r.words.clone()).unwrap_or_default()
    }

    /// Validates and commits a move. Returns false (board untouched) if the
    /// move is malformed, overlaps existing tiles, leaves a gap, misses the
    /// center star on the first move or floats unconnected later on.
    pub fn apply_move(&mut self, mv: &Move) -> bool {
        if !mv.is_valid() {
            return false;
        }
        if mv.positions().iter().any(|p| self.get_tile(*p).is_some()) {
            return false;
        }

        // Place tentatively; the contiguity checks need the tiles in the grid.
        for (tile, pos) in mv.tiles().iter().zip(mv.positions()) {
            self.grid[pos.row as usize][pos.col as usize] = Some(*tile);
        }

        let horizontal = Self::orientation(mv.positions());
        if !self.run_is_gap_free(mv.positions(), horizontal) || !self.is_anchored(mv.positions()) {
            for pos in mv.positions() {
                self.grid[pos.row as usize][pos.col as usize] = None;
            }
            return false;
        }

        let mut positions: Vec<Pos> = mv.positions().to_vec();
        positions.sort();

        let new_set: HashSet<Pos> = positions.iter().copied().collect();
        let (words, mut score) = self.collect_words(&positions, horizontal, &new_set);
        if mv.len() == 7 {
            score += BINGO_BONUS;
        }

        self.history.push(PlayRecord { positions, horizontal, score, words });
        true
    }

    /// Takes back the most recent move. Returns false on an empty board.
    pub fn undo_move(&mut self) -> bool {
        let Some(record) = self.history.pop() else {
            return false;
        };
        for pos in &record.positions {
            self.grid[pos.row as usize][pos.col as usize] = None;
        }
        true
    }

    /// Resolves the unset blanks of the most recent move, in board order, to
    /// the given letters, and refreshes that move's word list. Fails without
    /// mutation if the letter count does not match or a letter is invalid.
    pub fn set_blanks(&mut self, letters: &str) -> bool {
        let Some(record) = self.history.last() else {
            return false;
        };
        let blanks: Vec<Pos> = record
            .positions
            .iter()
            .copied()
            .filter(|p| matches!(self.get_tile(*p), Some(Tile::Blank(None))))
            .collect();

        let letters: Vec<char> = letters.chars().collect();
        if letters.len() != blanks.len() || !letters.iter().all(|c| c.is_ascii_alphabetic()) {
            return false;
        }

        for (pos, letter) in blanks.iter().zip(&letters) {
            if let Some(tile) = self.grid[pos.row as usize][pos.col as usize].as_mut() {
                tile.assign(*letter);
            }
        }

        // The formed words are now fully spelled out; refresh the record.
        let record = self.history.last().cloned();
        if let Some(record) = record {
            let new_set: HashSet<Pos> = record.positions.iter().copied().collect();
            let (words, _) = self.collect_words(&record.positions, record.horizontal, &new_set);
            if let Some(last) = self.history.last_mut() {
                last.words = words;
            }
        }
        true
    }

    fn orientation(positions: &[Pos]) -> bool {
        // A single tile scans as horizontal; its vertical word is picked up
        // as a cross word.
        positions.len() == 1 || positions.iter().all(|p| p.row == positions[0].row)
    }

    fn tile_at(&self, row: i16, col: i16) -> Option<Tile> {
        if !(0..BOARD_SIZE as i16).contains(&row) || !(0..BOARD_SIZE as i16).contains(&col) {
            return None;
        }
        self.grid[row as usize][col as usize]
    }

    /// With the move's tiles placed, the span from its first to its last
    /// position must be fully occupied.
    fn run_is_gap_free(&self, positions: &[Pos], horizontal: bool) -> bool {
        let coord = |p: &Pos| if horizontal { p.col } else { p.row };
        let min = positions.iter().map(&coord).min().unwrap_or(0);
        let max = positions.iter().map(&coord).max().unwrap_or(0);
        (min..=max).all(|i| {
            let pos = if horizontal {
                Pos { row: positions[0].row, col: i }
            } else {
                Pos { row: i, col: positions[0].col }
            };
            self.get_tile(pos).is_some()
        })
    }

    /// The first move must cover the center star; every later move must touch
    /// at least one tile that was already on the board.
    fn is_anchored(&self, positions: &[Pos]) -> bool {
        if self.history.is_empty() {
            return positions.contains(&Pos::center());
        }
        let new_set: HashSet<Pos> = positions.iter().copied().collect();
        positions.iter().any(|p| {
            let (r, c) = (p.row as i16, p.col as i16);
            [(r - 1, c), (r + 1, c), (r, c - 1), (r, c + 1)].into_iter().any(|(nr, nc)| {
                self.tile_at(nr, nc).is_some()
                    && !new_set.contains(&Pos { row: nr as u8, col: nc as u8 })
            })
        })
    }

    /// All words of length ≥ 2 formed by the newly placed tiles, with the
    /// move's total score. Premiums count on new tiles only.
    fn collect_words(
        &self,
        positions: &[Pos],
        horizontal: bool,
        new_set: &HashSet<Pos>,
    ) -> (Vec<String>, u32) {
        let mut words = Vec::new();
        let mut total = 0;

        let (text, points, len) = self.word_at(positions[0], horizontal, new_set);
        if len >= 2 {
            total += points;
            words.push(text);
        }
        for pos in positions {
            let (text, points, len) = self.word_at(*pos, !horizontal, new_set);
            if len >= 2 {
                total += points;
                words.push(text);
            }
        }
        (words, total)
    }

    /// The full word running through `pos` along one axis: its text, score
    /// and length.
    fn word_at(&self, pos: Pos, horizontal: bool, new_set: &HashSet<Pos>) -> (String, u32, usize) {
        let (dr, dc) = if horizontal { (0i16, 1i16) } else { (1, 0) };
        let (mut r, mut c) = (pos.row as i16, pos.col as i16);
        while self.tile_at(r - dr, c - dc).is_some() {
            r -= dr;
            c -= dc;
        }

        let mut text = String::new();
        let mut points = 0;
        let mut multiplier = 1;
        let mut len = 0;
        while let Some(tile) = self.tile_at(r, c) {
            let here = Pos { row: r as u8, col: c as u8 };
            let mut tile_points = tile.value();
            if new_set.contains(&here) {
                match premium(here) {
                    Premium::DoubleLetter => tile_points *= 2,
                    Premium::TripleLetter => tile_points *= 3,
                    Premium::DoubleWord => multiplier *= 2,
                    Premium::TripleWord => multiplier *= 3,
                    Premium::Plain => {}
                }
            }
            points += tile_points;
            text.push(tile.letter());
            len += 1;
            r += dr;
            c += dc;
        }
        (text, points * multiplier, len)
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::new()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.grid {
            for cell in row {
                match cell {
                    Some(tile) => write!(f, "{}", tile.letter())?,
                    None => write!(f, ".")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(c: char) -> Tile {
        Tile::new(c).unwrap()
    }

    fn pos(row: u8, col: u8) -> Pos {
        Pos::new(row, col).unwrap()
    }

    fn word_move(word: &str, row: u8, col: u8, horizontal: bool) -> Move {
        let tiles = word.chars().map(|c| tile(c)).collect();
        let positions = (0..word.len() as u8)
            .map(|i| if horizontal { pos(row, col + i) } else { pos(row + i, col) })
            .collect();
        Move::new(tiles, positions)
    }

    #[test]
    fn test_first_move_must_cover_center() {
        let mut board = Board::new();
        assert!(!board.apply_move(&word_move("CAT", 0, 0, true)));
        assert_eq!(board.get_tile(pos(0, 0)), None);

        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));
        assert_eq!(board.get_tile(pos(7, 8)), Some(tile('A')));
    }

    #[test]
    fn test_later_moves_must_connect() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));

        // Floating word far away.
        assert!(!board.apply_move(&word_move("DOG", 0, 0, true)));

        // Hooked vertically under the A.
        assert!(board.apply_move(&word_move("T", 8, 8, false)));
        assert_eq!(board.get_challenge_words(), vec!["AT".to_string()]);
    }

    #[test]
    fn test_gap_in_run_is_rejected() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));

        let gapped = Move::new(vec![tile('A'), tile('B')], vec![pos(8, 7), pos(10, 7)]);
        assert!(!board.apply_move(&gapped));
        assert_eq!(board.get_tile(pos(8, 7)), None);
    }

    #[test]
    fn test_overlap_with_existing_tile_is_rejected() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));
        assert!(!board.apply_move(&word_move("X", 7, 7, true)));
    }

    #[test]
    fn test_scoring_with_premiums() {
        let mut board = Board::new();
        // R A T E S from the center: double word at (7,7), double letter
        // under the S at (7,11).
        assert!(board.apply_move(&word_move("RATES", 7, 7, true)));
        assert_eq!(board.get_score(), 12);
        assert_eq!(board.get_challenge_words(), vec!["RATES".to_string()]);

        // Extending the run scores the whole word but no spent premiums.
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));
        assert!(board.apply_move(&word_move("S", 7, 10, true)));
        assert_eq!(board.get_score(), 6);
        assert_eq!(board.get_challenge_words(), vec!["CATS".to_string()]);
    }

    #[test]
    fn test_cross_words_are_scored_and_collected() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));
        // H above the A forms vertical HA; (6,8) is a double-letter square.
        assert!(board.apply_move(&word_move("H", 6, 8, true)));
        assert_eq!(board.get_challenge_words(), vec!["HA".to_string()]);
        assert_eq!(board.get_score(), 9);
    }

    #[test]
    fn test_bingo_bonus() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("AERATES", 7, 4, true)));
        // A E R A T E S = 7 points, doubled on the center star. Columns 4
        // through 10 of row 7 carry no letter premiums.
        assert_eq!(board.get_score(), 14 + BINGO_BONUS);
    }

    #[test]
    fn test_undo_restores_previous_state() {
        let mut board = Board::new();
        assert!(board.apply_move(&word_move("CAT", 7, 7, true)));
        assert!(board.apply_move(&word_move("S", 7, 10, true)));

        assert!(board.undo_move());
        assert_eq!(board.get_tile(pos(7, 10)), None);
        assert_eq!(board.get_score(), 10);
        assert_eq!(board.get_challenge_words(), vec!["CAT".to_string()]);

        assert!(board.undo_move());
        assert!(!board.undo_move());
        assert_eq!(board.get_score(), 0);
    }

    #[test]
    fn test_set_blanks_resolves_and_respells() {
        let mut board = Board::new();
        let mv = Move::new(
            vec![tile('?'), tile('A'), tile('T')],
            vec![pos(7, 7), pos(7, 8), pos(7, 9)],
        );
        assert!(board.apply_move(&mv));
        assert_eq!(board.get_challenge_words(), vec!["?AT".to_string()]);
        // Blank scores zero: A + T doubled on the star.
        assert_eq!(board.get_score(), 4);

        assert!(!board.set_blanks("CC"));
        assert!(!board.set_blanks(""));
        assert!(board.set_blanks("c"));
        assert_eq!(board.get_challenge_words(), vec!["CAT".to_string()]);
        assert_eq!(board.get_score(), 4);
    }
}
