//! Noise-tolerant resolution of rack-reader snapshots.
//!
//! A rack reader streams full observations of the tiles currently on its
//! rack. The resolver runs a two-state machine over them: while `Drawing`
//! the rack may only grow (within what the bag can still supply), while
//! `Playing` it may only shrink. Nothing is committed until the external
//! end-of-turn signal arrives; until then a bad frame is simply ignored.

use std::time::{Duration, Instant};

use crate::tile_bag::{
    TileBag, TileHistogram, difference, is_subset, is_superset, tile_count,
};

/// A snapshot older than this cannot carry an end-of-turn commit.
pub const MAX_SNAPSHOT_AGE: Duration = Duration::from_millis(3000);

/// Below this many consecutive identical snapshots the commit proceeds with
/// a warning.
pub const MIN_ACCEPTABLE_CONFIDENCE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RackState {
    /// The player is replenishing the rack from the bag.
    Drawing,
    /// The player is moving tiles from the rack to the board.
    Playing,
}

impl RackState {
    pub fn switch(self) -> RackState {
        match self {
            RackState::Drawing => RackState::Playing,
            RackState::Playing => RackState::Drawing,
        }
    }
}

#[derive(Debug)]
pub struct RackDeltaResolver {
    prev_snapshot: TileHistogram,
    curr_snapshot: TileHistogram,
    state: RackState,
    confidence: u32,
    last_update: Option<Instant>,
}

impl RackDeltaResolver {
    pub fn new() -> RackDeltaResolver {
        RackDeltaResolver {
            prev_snapshot: TileHistogram::new(),
            curr_snapshot: TileHistogram::new(),
            state: RackState::Drawing,
            confidence: 0,
            last_update: None,
        }
    }

    /// Offers a fresh snapshot. Accepted snapshots replace the current one
    /// and, if identical to it, raise confidence. Rejected snapshots leave
    /// the resolver untouched.
    pub fn process_delta(&mut self, rack: TileHistogram, bag: &TileBag) -> bool {
        let accepted = match self.state {
            RackState::Drawing => self.validate_drawing_delta(&rack, bag),
            RackState::Playing => self.validate_playing_delta(&rack),
        };
        if !accepted {
            return false;
        }

        self.last_update = Some(Instant::now());
        if rack == self.curr_snapshot {
            self.confidence += 1;
        }
        self.curr_snapshot = rack;
        true
    }

    /// Commits the current snapshot as this rack's state for the finished
    /// turn and flips the state machine. A drawing commit removes the drawn
    /// tiles from the bag and verifies the rack refilled to expectation.
    pub fn end_turn(&mut self, bag: &mut TileBag) -> bool {
        if self.state == RackState::Drawing {
            let tiles_drawn = difference(&self.curr_snapshot, &self.prev_snapshot);
            if !bag.remove_tiles(&tiles_drawn) {
                tracing::error!(
                    drawn = ?tiles_drawn,
                    prev = ?self.prev_snapshot,
                    curr = ?self.curr_snapshot,
                    "Unable to draw resolved tiles from the bag, should never happen"
                );
                return false;
            }

            let expected = bag.expected_on_rack(&self.prev_snapshot);
            if self.n_of_tiles() != expected {
                tracing::error!(
                    actual = self.n_of_tiles(),
                    expected,
                    "Incorrect number of tiles on rack at the end of a drawing turn"
                );
                return false;
            }
        }

        let age = self.last_update.map(|t| t.elapsed());
        if age.is_none_or(|a| a > MAX_SNAPSHOT_AGE) {
            tracing::error!(
                ?age,
                snapshot = ?self.curr_snapshot,
                "Most recent rack snapshot is too old for end-of-turn resolution"
            );
            return false;
        }

        if self.confidence < MIN_ACCEPTABLE_CONFIDENCE {
            tracing::warn!(
                confidence = self.confidence,
                snapshot = ?self.curr_snapshot,
                "Using low-confidence rack snapshot in end-of-turn resolution"
            );
        }

        self.state = self.state.switch();
        self.prev_snapshot = self.curr_snapshot.clone();
        self.confidence = 0;
        true
    }

    pub fn current_rack(&self) -> &TileHistogram {
        &self.curr_snapshot
    }

    pub fn n_of_tiles(&self) -> u32 {
        tile_count(&self.curr_snapshot)
    }

    pub fn state(&self) -> RackState {
        self.state
    }

    /// The tiles this turn moved: drawn tiles while Drawing, tiles leaving
    /// the rack while Playing.
    pub fn delta(&self) -> TileHistogram {
        match self.state {
            RackState::Playing => difference(&self.prev_snapshot, &self.curr_snapshot),
            RackState::Drawing => difference(&self.curr_snapshot, &self.prev_snapshot),
        }
    }

    fn validate_drawing_delta(&self, rack: &TileHistogram, bag: &TileBag) -> bool {
        if !is_superset(rack, &self.prev_snapshot) {
            tracing::warn!(
                ?rack,
                prev = ?self.prev_snapshot,
                "Ignoring rack drawing delta that is not a superset of the previous rack"
            );
            return false;
        }

        let tiles_drawn = difference(rack, &self.prev_snapshot);
        if !bag.is_feasible(&tiles_drawn) {
            tracing::warn!(
                ?rack,
                drawn = ?tiles_drawn,
                "Ignoring rack drawing delta whose drawn tiles are not feasible given the bag"
            );
            return false;
        }

        // Once the draw has reached its expected size, the reading may still
        // flicker; anything that changes the count again is noise.
        let expected = bag.expected_on_rack(&self.prev_snapshot);
        if tile_count(&self.curr_snapshot) == expected && tile_count(rack) != expected {
            tracing::warn!(
                ?rack,
                expected,
                "Ignoring rack drawing delta that deviates from the completed draw"
            );
            return false;
        }

        true
    }

    fn validate_playing_delta(&self, rack: &TileHistogram) -> bool {
        if !is_subset(rack, &self.prev_snapshot) {
            tracing::warn!(
                ?rack,
                prev = ?self.prev_snapshot,
                "Ignoring rack playing delta that is not a subset of the previous rack"
            );
            return false;
        }
        true
    }

    #[cfg(test)]
    fn backdate(&mut self, by: Duration) {
        self.last_update = self.last_update.and_then(|t| t.checked_sub(by));
    }
}

impl Default for RackDeltaResolver {
    fn default() -> Self {
        RackDeltaResolver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_bag::parse_rack;
    use scrabble::Tile;

    fn to_rack(tiles: &str) -> TileHistogram {
        parse_rack(tiles).unwrap()
    }

    fn playing_resolver(rack: &str) -> (RackDeltaResolver, TileBag) {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();
        assert!(resolver.process_delta(to_rack(rack), &bag));
        assert!(resolver.end_turn(&mut bag));
        assert_eq!(resolver.state(), RackState::Playing);
        (resolver, bag)
    }

    #[test]
    fn test_growing_draw_deltas_are_accepted() {
        let bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        let mut rack = String::new();
        assert!(resolver.process_delta(to_rack(&rack), &bag));
        for letter in "BDFEE?Y".chars() {
            rack.push(letter);
            assert!(resolver.process_delta(to_rack(&rack), &bag));
        }
        assert_eq!(resolver.n_of_tiles(), 7);
    }

    #[test]
    fn test_shrinking_draw_delta_is_rejected() {
        let bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("BDFEE?Y"), &bag));
        assert!(!resolver.process_delta(to_rack("BDFEE?"), &bag));
        assert!(!resolver.process_delta(to_rack("BDF"), &bag));
        assert_eq!(resolver.n_of_tiles(), 7);
    }

    #[test]
    fn test_misdrawn_eighth_tile_is_observed() {
        // A player drawing one tile too many is a physical reality; the
        // resolver records it and end_turn reports it.
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("ABFGEEDP"), &bag));
        assert_eq!(resolver.n_of_tiles(), 8);
        assert!(!resolver.end_turn(&mut bag));
    }

    #[test]
    fn test_infeasible_draw_delta_is_rejected() {
        let bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        // Only one Z in the bag.
        assert!(!resolver.process_delta(to_rack("ZZ"), &bag));
    }

    #[test]
    fn test_completed_draw_flicker_is_rejected() {
        let bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("RATES?V"), &bag));
        // The draw is complete at 7; a superset reading is flicker now.
        assert!(!resolver.process_delta(to_rack("RATES?VE"), &bag));
    }

    #[test]
    fn test_playing_subsets_are_accepted() {
        let (mut resolver, bag) = playing_resolver("RATES?V");

        assert!(resolver.process_delta(to_rack("RATES?V"), &bag));
        assert!(resolver.process_delta(to_rack("ATE?V"), &bag));
        assert!(resolver.process_delta(to_rack("ATEV"), &bag));
        // Tiles picked back up again are fine as long as they stay within
        // the committed rack.
        assert!(resolver.process_delta(to_rack("RATES?V"), &bag));
    }

    #[test]
    fn test_playing_non_subset_is_rejected() {
        let (mut resolver, bag) = playing_resolver("CPLEOBW");

        for rack in ["CPLEOBI", "CPLEVV", "?"] {
            assert!(!resolver.process_delta(to_rack(rack), &bag));
        }
    }

    #[test]
    fn test_draw_on_top_of_leftover_tiles() {
        let (mut resolver, mut bag) = playing_resolver("COWBELP");

        assert!(resolver.process_delta(to_rack("COW"), &bag));
        assert!(resolver.end_turn(&mut bag));
        assert_eq!(resolver.state(), RackState::Drawing);

        // Drawing resumes on top of the leftover C O W.
        assert!(resolver.process_delta(to_rack("COWE"), &bag));
        assert!(!resolver.process_delta(to_rack("COER"), &bag));
    }

    #[test]
    fn test_end_turn_commits_draw_against_bag() {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("POGBOLP"), &bag));
        assert!(resolver.end_turn(&mut bag));
        assert_eq!(bag.n_of_tiles(), 93);
        assert_eq!(resolver.state(), RackState::Playing);
        assert_eq!(resolver.delta(), TileHistogram::new());
    }

    #[test]
    fn test_end_turn_with_too_few_tiles_fails() {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("RAES?T"), &bag));
        assert!(!resolver.end_turn(&mut bag));
    }

    #[test]
    fn test_end_turn_with_stale_snapshot_fails() {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("RAEES?T"), &bag));
        resolver.backdate(MAX_SNAPSHOT_AGE + Duration::from_millis(100));
        assert!(!resolver.end_turn(&mut bag));
    }

    #[test]
    fn test_end_turn_without_any_snapshot_fails() {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();
        bag.empty();
        assert!(!resolver.end_turn(&mut bag));
    }

    #[test]
    fn test_repeated_end_turn_goes_stale() {
        let mut bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("LSTIUEI"), &bag));
        assert!(resolver.end_turn(&mut bag));

        // No new snapshot arrived; once the old one ages out a second
        // commit must fail.
        resolver.backdate(MAX_SNAPSHOT_AGE + Duration::from_millis(100));
        assert!(!resolver.end_turn(&mut bag));
    }

    #[test]
    fn test_delta_reports_played_tiles() {
        let (mut resolver, bag) = playing_resolver("RATES?V");

        assert!(resolver.process_delta(to_rack("ATESV"), &bag));
        let delta = resolver.delta();
        assert_eq!(tile_count(&delta), 2);
        assert_eq!(delta.get(&Tile::new('R').unwrap()), Some(&1));
        assert_eq!(delta.get(&Tile::new('?').unwrap()), Some(&1));
    }

    #[test]
    fn test_confidence_counts_identical_snapshots() {
        let bag = TileBag::new();
        let mut resolver = RackDeltaResolver::new();

        assert!(resolver.process_delta(to_rack("RATES?V"), &bag));
        assert_eq!(resolver.confidence, 0);
        assert!(resolver.process_delta(to_rack("RATES?V"), &bag));
        assert!(resolver.process_delta(to_rack("VRATES?"), &bag));
        assert_eq!(resolver.confidence, 2);
    }
}
