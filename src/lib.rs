//! go-zero: a Go engine core for evaluator-guided self-play.
//!
//! The crate provides the rules engine, a Monte Carlo Tree Search driven by
//! a pluggable position evaluator, and a bridge that batches evaluator calls
//! from many search threads into single calls to one expensive model.
//!
//! ## Modules
//!
//! - [`constants`] - Board limits and search/batching defaults
//! - [`zobrist`] - Process-wide Zobrist weights
//! - [`board`] - Board state, legality with positional superko, area scoring
//! - [`evaluator`] - The evaluator capability and input encoding
//! - [`mcts`] - Search tree with prior-guided UCB selection
//! - [`bridge`] - Cross-thread batching of evaluator calls
//! - [`logging`] - Logger setup for binaries
//!
//! ## Example
//!
//! ```
//! use go_zero::board::Color;
//! use go_zero::evaluator::UniformEvaluator;
//! use go_zero::mcts::{SearchConfig, SearchTree};
//!
//! let mut tree =
//!     SearchTree::new(5, 0.5, Color::Black, UniformEvaluator, SearchConfig::with_simulations(50))
//!         .unwrap();
//! let mv = tree.gen_play(false);
//! tree.play(mv);
//! println!("played {}", mv.describe(5));
//! ```

pub mod board;
pub mod bridge;
pub mod constants;
pub mod evaluator;
pub mod logging;
pub mod mcts;
pub mod zobrist;
