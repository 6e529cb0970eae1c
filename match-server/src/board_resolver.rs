//! Noise-tolerant resolution of board-camera snapshots.
//!
//! The camera repeatedly reports every tile it can see that the server has
//! not yet confirmed. Readings that contradict confirmed board state, exceed
//! a rack's worth of tiles or do not line up as a move are dropped; the
//! surviving delta is committed as a [`Move`] at end of turn.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use scrabble::{Board, Move, Pos, Tile};

/// Tiles newly visible on the board.
pub type BoardDelta = BTreeMap<Pos, Tile>;

/// A snapshot older than this cannot carry an end-of-turn commit.
/// Same value family as the rack resolver's, tuned independently.
pub const MAX_SNAPSHOT_AGE: Duration = Duration::from_millis(2000);

/// Below this many consecutive identical snapshots the commit proceeds with
/// a warning.
pub const MIN_ACCEPTABLE_CONFIDENCE: u32 = 2;

#[derive(Debug)]
pub struct BoardDeltaResolver {
    delta: BoardDelta,
    confidence: u32,
    last_update: Option<Instant>,
}

impl BoardDeltaResolver {
    pub fn new() -> BoardDeltaResolver {
        BoardDeltaResolver { delta: BoardDelta::new(), confidence: 0, last_update: None }
    }

    /// Offers a fresh camera reading. Positions the board already confirms
    /// are trimmed away; contradictions reject the whole reading.
    pub fn process_delta(&mut self, delta: BoardDelta, board: &Board) -> bool {
        let Some(trimmed) = Self::validate_delta(delta, board) else {
            return false;
        };

        self.last_update = Some(Instant::now());
        if trimmed == self.delta {
            self.confidence += 1;
        }
        self.delta = trimmed;
        true
    }

    /// Commits the confirmed delta onto the board as a move. An empty delta
    /// commits nothing and succeeds (a pass or exchange turn).
    pub fn end_turn(&mut self, board: &mut Board) -> bool {
        let age = self.last_update.map(|t| t.elapsed());
        if age.is_none_or(|a| a > MAX_SNAPSHOT_AGE) {
            tracing::error!(
                ?age,
                delta = ?self.delta,
                "Most recent board delta is too old for end-of-turn resolution"
            );
            return false;
        }

        if self.delta.is_empty() {
            self.confidence = 0;
            return true;
        }

        if self.confidence < MIN_ACCEPTABLE_CONFIDENCE {
            tracing::warn!(
                confidence = self.confidence,
                delta = ?self.delta,
                "Using low-confidence board delta in end-of-turn resolution"
            );
        }

        let mv = Self::delta_to_move(&self.delta);
        if !mv.is_valid() {
            tracing::error!(%mv, "Move formed by board delta is invalid, should never happen");
            return false;
        }
        if !board.apply_move(&mv) {
            tracing::error!(%mv, "Unable to apply move formed by board delta to the board");
            return false;
        }

        self.delta.clear();
        self.confidence = 0;
        true
    }

    /// The currently confirmed delta.
    pub fn delta(&self) -> &BoardDelta {
        &self.delta
    }

    pub fn delta_to_move(delta: &BoardDelta) -> Move {
        Move::new(delta.values().copied().collect(), delta.keys().copied().collect())
    }

    fn validate_delta(mut delta: BoardDelta, board: &Board) -> Option<BoardDelta> {
        let mut confirmed = Vec::new();
        for (pos, tile) in &delta {
            if let Some(placed) = board.get_tile(*pos) {
                if *tile != placed {
                    tracing::warn!(
                        ?delta,
                        measured = %tile,
                        confirmed = %placed,
                        at = %pos,
                        "Ignoring board delta contradicting a confirmed tile"
                    );
                    return None;
                }
                confirmed.push(*pos);
            }
        }
        for pos in confirmed {
            delta.remove(&pos);
        }

        if delta.len() > 7 {
            tracing::warn!(?delta, "Ignoring board delta with more than 7 tiles");
            return None;
        }
        if delta.is_empty() {
            return Some(delta);
        }
        if !Self::delta_to_move(&delta).is_valid() {
            tracing::warn!(?delta, "Ignoring board delta that does not form a valid move");
            return None;
        }
        Some(delta)
    }

    #[cfg(test)]
    fn backdate(&mut self, by: Duration) {
        self.last_update = self.last_update.and_then(|t| t.checked_sub(by));
    }
}

impl Default for BoardDeltaResolver {
    fn default() -> Self {
        BoardDeltaResolver::new()
    }
}
