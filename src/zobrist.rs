//! Zobrist weights shared by every board in the process.

use std::sync::LazyLock;

use crate::board::{Color, Point};
use crate::constants::{HASH_SEED, MAX_AREA};

/// The process-wide hash table, built on first use.
pub static ZOBRIST: LazyLock<HashTable> = LazyLock::new(|| HashTable::with_seed(HASH_SEED));

/// One random 64-bit weight per (point, color) of the largest board.
///
/// Boards of any supported size index into the same table, so hashes are
/// only comparable between boards of equal size.
pub struct HashTable {
    weights: Box<[u64]>,
}

impl HashTable {
    /// Generate a table from a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let weights = (0..2 * MAX_AREA).map(|_| rng.u64(..)).collect();
        Self { weights }
    }

    /// Weight of a `color` stone at `pt`.
    #[inline]
    pub fn weight(&self, pt: Point, color: Color) -> u64 {
        debug_assert!(pt < MAX_AREA, "point {pt} outside hash table");
        self.weights[color.index() * MAX_AREA + pt]
    }
}
