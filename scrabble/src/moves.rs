//! A move: the tiles a player placed and where they placed them.

use std::collections::HashSet;
use std::fmt;

use crate::pos::Pos;
use crate::tile::Tile;

/// An ordered pairing of tiles and board positions. Whether the move fits the
/// current board (empty squares, contiguity, connection) is the board's
/// business; `is_valid` covers the board-independent part.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    tiles: Vec<Tile>,
    positions: Vec<Pos>,
}

impl Move {
    pub fn new(tiles: Vec<Tile>, positions: Vec<Pos>) -> Move {
        Move { tiles, positions }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn positions(&self) -> &[Pos] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Board-independent validity: nonempty, one tile per position, no
    /// repeated position, and all positions on a single row or column.
    pub fn is_valid(&self) -> bool {
        if self.tiles.is_empty() || self.tiles.len() != self.positions.len() {
            return false;
        }
        let unique: HashSet<Pos> = self.positions.iter().copied().collect();
        if unique.len() != self.positions.len() {
            return false;
        }
        let same_row = self.positions.iter().all(|p| p.row == self.positions[0].row);
        let same_col = self.positions.iter().all(|p| p.col == self.positions[0].col);
        same_row || same_col
    }

    /// Number of blank tiles in this move not yet resolved to a letter.
    pub fn n_of_unset_blanks(&self) -> usize {
        self.tiles.iter().filter(|t| matches!(t, Tile::Blank(None))).count()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tile, pos) in self.tiles.iter().zip(&self.positions) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{tile} @ {pos}")?;
            first = false;
        }
        Ok(())
    }
}
