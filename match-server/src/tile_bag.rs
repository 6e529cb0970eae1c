//! The bag of tiles a match draws from, plus the histogram algebra the delta
//! resolvers are built on. A rack or a draw is always a histogram
//! `Tile → count`; the bag itself is one big histogram initialized to the
//! standard English distribution of 100 tiles.

use std::collections::HashMap;

use scrabble::Tile;

/// A multiset of tiles.
pub type TileHistogram = HashMap<Tile, u32>;

/// Maximum number of tiles on a legal rack.
pub const RACK_CAPACITY: u32 = 7;

/// The standard English distribution, 100 tiles in total.
const STARTING_BAG: [(char, u32); 27] = [
    ('A', 9),
    ('B', 2),
    ('C', 2),
    ('D', 4),
    ('E', 12),
    ('F', 2),
    ('G', 3),
    ('H', 2),
    ('I', 9),
    ('J', 1),
    ('K', 1),
    ('L', 4),
    ('M', 2),
    ('N', 6),
    ('O', 8),
    ('P', 2),
    ('Q', 1),
    ('R', 6),
    ('S', 4),
    ('T', 6),
    ('U', 4),
    ('V', 2),
    ('W', 2),
    ('X', 1),
    ('Y', 2),
    ('Z', 1),
    ('?', 2),
];

/// Total number of tiles in a histogram.
pub fn tile_count(histogram: &TileHistogram) -> u32 {
    histogram.values().sum()
}

/// True if `current` contains at least every tile of `previous`.
pub fn is_superset(current: &TileHistogram, previous: &TileHistogram) -> bool {
    previous
        .iter()
        .all(|(tile, count)| current.get(tile).copied().unwrap_or(0) >= *count)
}

/// True if `current` contains no tile beyond those of `previous`.
pub fn is_subset(current: &TileHistogram, previous: &TileHistogram) -> bool {
    is_superset(previous, current)
}

/// The tiles present in `superset` beyond those in `subset`. Callers ensure
/// the superset relation; anything `subset` has in excess is ignored.
pub fn difference(superset: &TileHistogram, subset: &TileHistogram) -> TileHistogram {
    debug_assert!(is_superset(superset, subset));
    superset
        .iter()
        .filter_map(|(tile, count)| {
            let remaining = count.saturating_sub(subset.get(tile).copied().unwrap_or(0));
            (remaining > 0).then_some((*tile, remaining))
        })
        .collect()
}

/// Builds a histogram from individual tiles.
pub fn histogram_from_tiles(tiles: impl IntoIterator<Item = Tile>) -> TileHistogram {
    let mut histogram = TileHistogram::new();
    for tile in tiles {
        *histogram.entry(tile).or_default() += 1;
    }
    histogram
}

/// Parses a rack string as sent by a rack reader: case-insensitive letters
/// and `?`. Fails on any other character.
pub fn parse_rack(tiles: &str) -> Result<TileHistogram, String> {
    let mut histogram = TileHistogram::new();
    for c in tiles.chars() {
        let tile = Tile::new(c).map_err(|e| e.to_string())?;
        *histogram.entry(tile).or_default() += 1;
    }
    Ok(histogram)
}

#[derive(Debug)]
pub struct TileBag {
    histogram: TileHistogram,
}

impl TileBag {
    pub fn new() -> TileBag {
        let histogram = STARTING_BAG
            .iter()
            .filter_map(|(letter, count)| Tile::new(*letter).ok().map(|t| (t, *count)))
            .collect();
        TileBag { histogram }
    }

    /// True if every requested tile is still in the bag in sufficient number.
    pub fn is_feasible(&self, tiles: &TileHistogram) -> bool {
        tiles
            .iter()
            .all(|(tile, count)| self.histogram.get(tile).copied().unwrap_or(0) >= *count)
    }

    /// Removes `tiles` from the bag. Atomic: on an infeasible request the
    /// bag is left untouched and false is returned.
    pub fn remove_tiles(&mut self, tiles: &TileHistogram) -> bool {
        if !self.is_feasible(tiles) {
            return false;
        }
        for (tile, count) in tiles {
            if let Some(remaining) = self.histogram.get_mut(tile) {
                *remaining -= count;
            }
        }
        true
    }

    /// Returns `tiles` to the bag. The starting-count bound is deliberately
    /// not enforced so tests can pair this with [`TileBag::empty`].
    pub fn add_tiles(&mut self, tiles: &TileHistogram) -> bool {
        for (tile, count) in tiles {
            *self.histogram.entry(*tile).or_default() += count;
        }
        true
    }

    /// Completely empties the bag. Test aid.
    pub fn empty(&mut self) {
        for count in self.histogram.values_mut() {
            *count = 0;
        }
    }

    /// Number of tiles left in the bag.
    pub fn n_of_tiles(&self) -> u32 {
        tile_count(&self.histogram)
    }

    /// How many tiles a rack holding `rack` should have once it has drawn
    /// back up: seven, unless the bag runs dry first.
    pub fn expected_on_rack(&self, rack: &TileHistogram) -> u32 {
        (tile_count(rack) + self.n_of_tiles()).min(RACK_CAPACITY)
    }
}

impl Default for TileBag {
    fn default() -> Self {
        TileBag::new()
    }
}
