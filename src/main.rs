//! go-zero command line driver.
//!
//! ## Usage
//!
//! - `go-zero selfplay` - Play a game between two search trees
//! - `go-zero batched` - Exercise the batching bridge from worker threads
//! - `go-zero show <layout>` - Print a board parsed from a layout string

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use log::{error, info};

use go_zero::board::{BoardState, Color, Move};
use go_zero::bridge::{BatchEvaluator, BatchOutput, BatchingBridge};
use go_zero::constants::{KOMI, MAX_N, N, PLANES};
use go_zero::evaluator::{Evaluator, UniformEvaluator};
use go_zero::logging::setup_logging;
use go_zero::mcts::{SearchConfig, SearchTree};

/// go-zero: evaluator-guided Go search
#[derive(Parser)]
#[command(name = "go-zero")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play self-play games with the uniform evaluator
    Selfplay {
        #[arg(long, default_value_t = N)]
        size: usize,
        #[arg(long, default_value_t = KOMI)]
        komi: f32,
        /// Simulations per move
        #[arg(long, default_value_t = 200)]
        simulations: usize,
        #[arg(long, default_value_t = 1)]
        games: usize,
        /// Stop a game after this many plies (default: 3 x area)
        #[arg(long)]
        max_plies: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Log search statistics for every move
        #[arg(long)]
        verbose: bool,
    },
    /// Drive a batching bridge from worker threads
    Batched {
        #[arg(long, default_value_t = N)]
        size: usize,
        #[arg(long, default_value_t = 4)]
        batch_size: usize,
        /// Worker threads (default: 1.5 x batch size)
        #[arg(long)]
        workers: Option<usize>,
        /// Evaluations shared among the workers; a multiple of the batch size
        #[arg(long, default_value_t = 48)]
        evaluations: usize,
    },
    /// Parse a layout of `.`, `X` and `O` (top row first) and print it
    Show {
        layout: String,
        #[arg(long, default_value_t = 0.0)]
        komi: f32,
    },
}

fn main() -> Result<()> {
    let _logger = setup_logging("info")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Selfplay {
            size,
            komi,
            simulations,
            games,
            max_plies,
            seed,
            verbose,
        } => {
            let config = SearchConfig {
                simulations,
                seed,
                ..Default::default()
            };
            run_selfplay(size, komi, games, max_plies.unwrap_or(3 * size * size), config, verbose)
        }
        Commands::Batched {
            size,
            batch_size,
            workers,
            evaluations,
        } => run_batched(size, batch_size, workers, evaluations),
        Commands::Show { layout, komi } => {
            let board = BoardState::from_layout(&layout, komi).context("failed to parse layout")?;
            println!("{board}");
            println!("Score (Black - White): {}", board.score());
            Ok(())
        }
    }
}

fn run_selfplay(
    size: usize,
    komi: f32,
    games: usize,
    max_plies: usize,
    config: SearchConfig,
    verbose: bool,
) -> Result<()> {
    ensure!(
        (1..=MAX_N).contains(&size),
        "board size {size} outside 1..={MAX_N}"
    );
    let white_config = SearchConfig {
        seed: config.seed.map(|s| s.wrapping_add(1)),
        ..config.clone()
    };
    let mut black = SearchTree::new(size, komi, Color::Black, UniformEvaluator, config)
        .context("failed to create Black's search tree")?;
    let mut white = SearchTree::new(size, komi, Color::White, UniformEvaluator, white_config)
        .context("failed to create White's search tree")?;

    for game in 1..=games {
        black.reset();
        white.reset();
        let start = Instant::now();
        let mut moves = Vec::new();
        let mut last_pass = false;

        for ply in 0..max_plies {
            let (mover, other) = if ply % 2 == 0 {
                (&mut black, &mut white)
            } else {
                (&mut white, &mut black)
            };
            let mv = mover.gen_play(verbose);
            mover.play(mv);
            other.opponent_play(mv);
            moves.push(mv.describe(size));
            if mv.is_pass() && last_pass {
                break;
            }
            last_pass = mv.is_pass();
        }

        println!("Game {game}: {}", moves.join(" "));
        println!("{}", black.board());
        println!(
            "Score (Black - White): {}  [{} plies, {:.2?}]",
            black.score(),
            moves.len(),
            start.elapsed()
        );
    }
    Ok(())
}

/// Batch evaluator that answers like [`UniformEvaluator`] for every row.
struct UniformBatch {
    total_moves: usize,
}

impl BatchEvaluator for UniformBatch {
    fn evaluate_batch(&mut self, input: &[f32], batch_size: usize) -> Result<BatchOutput> {
        ensure!(
            input.len() == batch_size * PLANES * (self.total_moves - 1),
            "unexpected input length {}",
            input.len()
        );
        let prior = vec![1.0 / self.total_moves as f32; batch_size * self.total_moves];
        Ok(BatchOutput::new(prior, vec![0.5; batch_size], batch_size, self.total_moves))
    }
}

fn run_batched(
    size: usize,
    batch_size: usize,
    workers: Option<usize>,
    evaluations: usize,
) -> Result<()> {
    ensure!(
        (1..=MAX_N).contains(&size),
        "board size {size} outside 1..={MAX_N}"
    );
    ensure!(batch_size > 0, "batch size must be positive");
    let bridge = Arc::new(BatchingBridge::new(size, batch_size));
    let workers = workers.unwrap_or_else(|| bridge.worker_thread_count());
    ensure!(
        workers >= batch_size && workers < 2 * batch_size,
        "{workers} workers cannot drive batches of {batch_size}"
    );
    ensure!(
        evaluations % batch_size == 0,
        "{evaluations} evaluations do not fill whole batches of {batch_size}"
    );

    // Workers draw from one budget, so all of them keep submitting until the
    // last batch is full.
    let budget = AtomicUsize::new(0);
    let start = Instant::now();
    thread::scope(|scope| {
        let server = {
            let bridge = Arc::clone(&bridge);
            scope.spawn(move || {
                let mut evaluator = UniformBatch {
                    total_moves: size * size + 1,
                };
                bridge.run(&mut evaluator);
            })
        };

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let bridge = Arc::clone(&bridge);
                let budget = &budget;
                scope.spawn(move || {
                    random_walk(&*bridge, size, worker as u64, || {
                        budget.fetch_add(1, Ordering::Relaxed) < evaluations
                    })
                })
            })
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("a batching worker panicked");
            }
        }
        bridge.close();
        if server.join().is_err() {
            error!("the batch evaluator thread panicked");
        }
    });

    info!(
        "{evaluations} evaluations in {} batches, {:.2?}",
        bridge.batches_evaluated(),
        start.elapsed()
    );
    println!("Batches evaluated: {}", bridge.batches_evaluated());
    Ok(())
}

/// Evaluate a position, play a random legal move, repeat while `claim`
/// grants another evaluation.
fn random_walk<E: Evaluator>(evaluator: &E, size: usize, seed: u64, mut claim: impl FnMut() -> bool) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut board = BoardState::new(size, 0.0);
    let mut to_move = Color::Black;
    while claim() {
        evaluator.evaluate(&board, to_move);
        let legal: Vec<Move> = (0..board.total_moves())
            .map(|id| Move::from_id(to_move, id, size))
            .filter(|&mv| board.is_valid(mv))
            .collect();
        let mv = legal[rng.usize(..legal.len())];
        board.play(mv);
        to_move = to_move.opposite();
    }
}
