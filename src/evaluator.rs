//! Position evaluation capability used to guide the search.
//!
//! An [`Evaluator`] maps a board and the color to move onto a prior over all
//! move ids (every point in row-major order, then the pass) and a scalar
//! estimate of the probability that the mover wins. The neural network that
//! normally fills this role lives outside this crate.

use std::sync::Arc;

use crate::board::{BoardState, Color};
use crate::constants::PLANES;

/// Evaluation result: prior policy + value estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Prior for each move id; length is `board.total_moves()`.
    pub prior: Vec<f32>,
    /// Probability in [0, 1] that the player to move wins.
    pub value: f32,
}

/// Trait for evaluating positions.
pub trait Evaluator {
    fn evaluate(&self, board: &BoardState<'_>, to_move: Color) -> Evaluation;
}

impl<E: Evaluator + ?Sized> Evaluator for &E {
    fn evaluate(&self, board: &BoardState<'_>, to_move: Color) -> Evaluation {
        (**self).evaluate(board, to_move)
    }
}

impl<E: Evaluator + ?Sized> Evaluator for Arc<E> {
    fn evaluate(&self, board: &BoardState<'_>, to_move: Color) -> Evaluation {
        (**self).evaluate(board, to_move)
    }
}

/// Equal priors for every move and an even value, so search is driven by
/// game results alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformEvaluator;

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, board: &BoardState<'_>, _to_move: Color) -> Evaluation {
        let total = board.total_moves();
        Evaluation {
            prior: vec![1.0 / total as f32; total],
            value: 0.5,
        }
    }
}

/// Write the network input planes for `board` into `out`.
///
/// Plane 0 holds the mover's stones, plane 1 the opponent's, and plane 2 is
/// filled with the mover's color index. `out` must hold `PLANES * area`
/// values.
pub fn encode_board(board: &BoardState<'_>, to_move: Color, out: &mut [f32]) {
    let area = board.area();
    assert_eq!(out.len(), PLANES * area, "input row has the wrong length");
    let (own, rest) = out.split_at_mut(area);
    let (opp, side) = rest.split_at_mut(area);
    for pt in 0..area {
        own[pt] = f32::from(u8::from(board.has_stone(pt, to_move)));
        opp[pt] = f32::from(u8::from(board.has_stone(pt, to_move.opposite())));
    }
    side.fill(to_move.index() as f32);
}
