//! Constants for board dimensions, search parameters, and batching.
//!
//! The board size is chosen at run time (see [`crate::board::BoardState::new`]);
//! everything sized per intersection is bounded by [`MAX_N`].

// =============================================================================
// Board Geometry
// =============================================================================

/// Default board size (NxN) used by `Default` impls and the command line.
pub const N: usize = 9;

/// Largest supported board size.
pub const MAX_N: usize = 19;

/// Number of intersections on the largest supported board.
pub const MAX_AREA: usize = MAX_N * MAX_N;

/// Default komi (compensation points for White).
pub const KOMI: f32 = 7.5;

// =============================================================================
// Hashing
// =============================================================================

/// Seed of the process-wide Zobrist table. Fixed so that hashes are
/// reproducible between runs; it carries no security meaning.
pub const HASH_SEED: u64 = 100;

// =============================================================================
// MCTS Parameters
// =============================================================================

/// Default number of simulations per generated move.
pub const SEARCH_COUNT: usize = 1000;

/// Concentration of the Dirichlet noise mixed into every new node's priors.
pub const DIRICHLET_ALPHA: f32 = 1.03;

/// Share of a node's prior taken from Dirichlet noise.
pub const NOISE_FRACTION: f32 = 0.25;

/// Inverse temperature used for move sampling in the opening.
pub const EARLY_INV_TEMPERATURE: f32 = 1.0;

/// Inverse temperature used once the game is past the opening.
pub const LATE_INV_TEMPERATURE: f32 = 5.0;

/// Mean value assumed for a move that has never been visited.
pub const UNVISITED_VALUE: f32 = 0.5;

/// Prior sentinel for moves found to be invalid at a node.
pub const INVALID_PRIOR: f32 = -1.0;

// =============================================================================
// Batching
// =============================================================================

/// Number of rotating buffers in a batching bridge.
pub const BATCH_COPIES: usize = 16;

/// Input planes per board: mover's stones, opponent's stones, mover color.
pub const PLANES: usize = 3;
