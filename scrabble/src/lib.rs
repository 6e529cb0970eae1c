//! Scrabble rules library: tiles, board positions, moves and the board
//! itself, including move legality, premium scoring, challengeable-word
//! extraction, blank resolution and undo.
//!
//! The library is deliberately free of any networking or sensor concerns; the
//! match server consumes it through [`Board`], [`Move`], [`Tile`] and [`Pos`].

mod board;
mod moves;
mod pos;
mod tile;

pub use board::Board;
pub use moves::Move;
pub use pos::{BOARD_SIZE, Pos};
pub use tile::{InvalidTile, Tile};
