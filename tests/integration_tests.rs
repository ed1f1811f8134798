//! Integration tests for search trees playing full games.

use std::cell::Cell;

use go_zero::board::{BoardState, Color, Move, Point};
use go_zero::evaluator::{Evaluation, Evaluator, UniformEvaluator};
use go_zero::mcts::{SearchConfig, SearchTree};

// =============================================================================
// Test evaluators
// =============================================================================

/// Uniform evaluator that counts its calls.
#[derive(Default)]
struct Counting {
    calls: Cell<usize>,
}

impl Evaluator for Counting {
    fn evaluate(&self, board: &BoardState<'_>, to_move: Color) -> Evaluation {
        self.calls.set(self.calls.get() + 1);
        UniformEvaluator.evaluate(board, to_move)
    }
}

/// Puts 90% of the prior on a single point.
struct Favorite(Point);

impl Evaluator for Favorite {
    fn evaluate(&self, board: &BoardState<'_>, _to_move: Color) -> Evaluation {
        let total = board.total_moves();
        let mut prior = vec![0.1 / (total - 1) as f32; total];
        prior[self.0] = 0.9;
        Evaluation { prior, value: 0.5 }
    }
}

fn config(simulations: usize, seed: u64) -> SearchConfig {
    SearchConfig {
        simulations,
        seed: Some(seed),
        ..Default::default()
    }
}

// =============================================================================
// Self-play
// =============================================================================

#[test]
fn test_selfplay_trees_stay_in_sync() {
    let mut black =
        SearchTree::new(5, 0.5, Color::Black, UniformEvaluator, config(40, 1)).unwrap();
    let mut white =
        SearchTree::new(5, 0.5, Color::White, UniformEvaluator, config(40, 2)).unwrap();

    let mut last_pass = false;
    let mut finished = false;
    for ply in 0..200 {
        let (mover, other) = if ply % 2 == 0 {
            (&mut black, &mut white)
        } else {
            (&mut white, &mut black)
        };
        assert!(mover.is_my_turn());
        assert!(!other.is_my_turn());

        let mv = mover.gen_play(false);
        assert_eq!(mv.color, mover.color());
        assert!(mover.board().is_valid(mv), "generated illegal {}", mv.describe(5));
        mover.play(mv);
        other.opponent_play(mv);

        assert_eq!(black.board().hash(), white.board().hash());
        if mv.is_pass() && last_pass {
            finished = true;
            break;
        }
        last_pass = mv.is_pass();
    }

    assert_eq!(black.history(), white.history());
    assert_eq!(black.score(), -white.score());
    if finished {
        let n = black.history().len();
        assert!(black.history()[n - 2..].iter().all(Move::is_pass));
    }
}

#[test]
fn test_reset_starts_a_new_game() {
    let mut black =
        SearchTree::new(5, 0.5, Color::Black, UniformEvaluator, config(20, 3)).unwrap();
    let mv = black.gen_play(false);
    black.play(mv);
    black.opponent_play(Move::pass(Color::White));
    assert!(black.node_count() > 1);

    black.reset();
    assert!(black.is_my_turn());
    assert!(black.history().is_empty());
    assert_eq!(black.node_count(), 1);
    assert_eq!(black.board().hash(), 0);
    assert_eq!(black.score(), -0.5);
}

// =============================================================================
// Search statistics
// =============================================================================

#[test]
fn test_one_evaluation_per_node() {
    let counter = Counting::default();
    let mut tree = SearchTree::new(5, 0.0, Color::Black, &counter, config(30, 4)).unwrap();
    assert_eq!(counter.calls.get(), 1);

    tree.gen_play(false);
    assert_eq!(counter.calls.get(), tree.node_count());
    assert_eq!(tree.search_count().iter().sum::<u32>(), 30);
}

#[test]
fn test_playing_a_searched_move_reuses_its_subtree() {
    let mut tree = SearchTree::new(5, 0.0, Color::Black, UniformEvaluator, config(60, 5)).unwrap();
    let mv = tree.gen_play(false);
    let visits = tree.search_count()[mv.id(5)];
    let nodes = tree.node_count();

    tree.play(mv);
    assert_eq!(tree.node_count(), nodes);
    assert_eq!(tree.node(tree.root()).total_count + 1, visits);
}

#[test]
fn test_playing_an_unsearched_move_creates_a_node() {
    let mut white = SearchTree::new(5, 0.0, Color::White, UniformEvaluator, config(10, 6)).unwrap();
    white.opponent_play(Move::at(Color::Black, 12));
    assert_eq!(white.node_count(), 2);
    assert!(white.is_my_turn());
    assert_eq!(white.node(white.root()).total_count, 0);
}

#[test]
fn test_priors_steer_the_search() {
    let center = 12;
    let settings = SearchConfig {
        noise_fraction: 0.0,
        ..config(100, 7)
    };
    let mut tree = SearchTree::new(5, 0.0, Color::Black, Favorite(center), settings).unwrap();
    tree.gen_play(false);

    let counts = tree.search_count();
    let best = (0..counts.len()).max_by_key(|&m| counts[m]).unwrap();
    assert_eq!(best, center);
    assert!(counts[center] > 50);
}

#[test]
fn test_invalid_moves_are_never_searched() {
    let mut black = SearchTree::new(3, 0.0, Color::Black, UniformEvaluator, config(50, 8)).unwrap();
    black.play(Move::at(Color::Black, 4));
    black.opponent_play(Move::at(Color::White, 0));

    black.gen_play(false);
    let counts = black.search_count();
    assert_eq!(counts[0], 0);
    assert_eq!(counts[4], 0);
    let root = black.node(black.root());
    assert!(root.is_invalid(0));
    assert!(root.is_invalid(4));
}

// =============================================================================
// Misuse
// =============================================================================

#[test]
#[should_panic(expected = "illegal move")]
fn test_playing_on_a_stone_panics() {
    let mut black = SearchTree::new(5, 0.0, Color::Black, UniformEvaluator, config(1, 9)).unwrap();
    black.play(Move::at(Color::Black, 3));
    black.opponent_play(Move::at(Color::White, 3));
}

#[test]
#[should_panic(expected = "own moves")]
fn test_play_rejects_opponent_color() {
    let mut black = SearchTree::new(5, 0.0, Color::Black, UniformEvaluator, config(1, 10)).unwrap();
    black.play(Move::at(Color::White, 3));
}
