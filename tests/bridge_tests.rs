//! Multi-threaded tests for the batching bridge.
//!
//! A batch is only evaluated once all of its rows are filled, so a test must
//! keep at least `W` threads submitting until its last batch is full. Workers
//! here either draw from a shared budget or run in lockstep with exactly `W`
//! threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use go_zero::board::{BoardState, Color, Move};
use go_zero::bridge::{BatchEvaluator, BatchOutput, BatchingBridge};
use go_zero::constants::PLANES;
use go_zero::evaluator::Evaluator;
use go_zero::mcts::{SearchConfig, SearchTree};

// =============================================================================
// Test evaluators and helpers
// =============================================================================

/// Answers each row with a value derived from that row's input, so workers
/// can tell whether they got their own result back.
struct Echo {
    area: usize,
    batch_sizes: Vec<usize>,
}

impl Echo {
    fn new(size: usize) -> Self {
        Self {
            area: size * size,
            batch_sizes: Vec::new(),
        }
    }
}

impl BatchEvaluator for Echo {
    fn evaluate_batch(&mut self, input: &[f32], batch_size: usize) -> anyhow::Result<BatchOutput> {
        let stride = PLANES * self.area;
        anyhow::ensure!(input.len() == batch_size * stride, "bad input length");
        self.batch_sizes.push(batch_size);

        let total = self.area + 1;
        let mut prior = vec![0.0; batch_size * total];
        let mut value = Vec::with_capacity(batch_size);
        for (row, planes) in input.chunks(stride).enumerate() {
            let own: f32 = planes[..self.area].iter().sum();
            let color = planes[2 * self.area];
            prior[row * total + total - 1] = color;
            value.push(own / 100.0);
        }
        Ok(BatchOutput::new(prior, value, batch_size, total))
    }
}

/// Uniform answers for every row.
struct Flat {
    total: usize,
}

impl BatchEvaluator for Flat {
    fn evaluate_batch(&mut self, _input: &[f32], batch_size: usize) -> anyhow::Result<BatchOutput> {
        Ok(BatchOutput::new(
            vec![1.0 / self.total as f32; batch_size * self.total],
            vec![0.5; batch_size],
            batch_size,
            self.total,
        ))
    }
}

/// Claim one evaluation from a shared budget of `total`.
fn claim(budget: &AtomicUsize, total: usize) -> bool {
    budget.fetch_add(1, Ordering::Relaxed) < total
}

/// Worker `worker` owns `worker` stones before its first request and one
/// more after each answer; checks every answer matches its own board.
fn echo_worker(bridge: &BatchingBridge, worker: usize, mut next: impl FnMut() -> bool) -> usize {
    let size = bridge.board_size();
    let color = if worker % 2 == 0 { Color::Black } else { Color::White };
    let mut board = BoardState::new(size, 0.0);
    for pt in 0..worker {
        board.play(Move::at(color, pt));
    }
    let mut own = worker;
    while next() {
        let eval = bridge.evaluate(&board, color);
        assert_eq!(eval.prior.len(), size * size + 1);
        assert_eq!(eval.value, own as f32 / 100.0);
        assert_eq!(eval.prior[size * size], color.index() as f32);
        board.play(Move::at(color, own));
        own += 1;
    }
    own - worker
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn test_one_full_batch_from_batch_size_threads() {
    const SIZE: usize = 5;
    const W: usize = 4;
    let bridge = BatchingBridge::new(SIZE, W);

    let mut echo = Echo::new(SIZE);
    thread::scope(|scope| {
        let server = scope.spawn(|| bridge.run(&mut echo));
        let handles: Vec<_> = (0..W)
            .map(|worker| {
                let bridge = &bridge;
                scope.spawn(move || {
                    let mut once = true;
                    echo_worker(bridge, worker, || std::mem::take(&mut once))
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        bridge.close();
        server.join().unwrap();
    });

    assert_eq!(bridge.batches_evaluated(), 1);
    assert_eq!(echo.batch_sizes, vec![W]);
}

#[test]
fn test_workers_receive_their_own_rows() {
    const SIZE: usize = 9;
    const TOTAL: usize = 24;
    let bridge = BatchingBridge::new(SIZE, 4);
    let workers = bridge.worker_thread_count();
    assert_eq!(workers, 6);
    let budget = AtomicUsize::new(0);

    let mut echo = Echo::new(SIZE);
    let answered = thread::scope(|scope| {
        let server = scope.spawn(|| bridge.run(&mut echo));
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let bridge = &bridge;
                let budget = &budget;
                scope.spawn(move || echo_worker(bridge, worker, || claim(budget, TOTAL)))
            })
            .collect();
        let answered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        bridge.close();
        server.join().unwrap();
        answered
    });

    assert_eq!(answered, TOTAL);
    assert_eq!(bridge.batches_evaluated(), (TOTAL / 4) as u64);
    assert!(echo.batch_sizes.iter().all(|&w| w == 4));
}

#[test]
fn test_buffers_rotate_past_all_copies() {
    // Enough batches to wrap around every buffer several times.
    const SIZE: usize = 3;
    const TOTAL: usize = 192;
    let bridge = BatchingBridge::new(SIZE, 2);
    let workers = bridge.worker_thread_count();
    assert_eq!(workers, 3);
    let budget = AtomicUsize::new(0);

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            bridge.run(&mut Flat {
                total: SIZE * SIZE + 1,
            })
        });
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let bridge = &bridge;
                let budget = &budget;
                scope.spawn(move || {
                    let board = BoardState::new(SIZE, 0.0);
                    while claim(budget, TOTAL) {
                        let eval = bridge.evaluate(&board, Color::Black);
                        assert_eq!(eval.value, 0.5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        bridge.close();
        server.join().unwrap();
    });

    assert_eq!(bridge.batches_evaluated(), (TOTAL / 2) as u64);
}

// =============================================================================
// Search over a bridge
// =============================================================================

#[test]
fn test_search_trees_share_a_bridge() {
    const SIZE: usize = 5;
    const W: usize = 4;
    let bridge = BatchingBridge::new(SIZE, W);

    // Without noise, three simulations on a fresh tree each open a new
    // child, so every tree makes exactly four evaluations: the root plus one
    // per simulation. Playing the chosen move reuses its node. With exactly
    // W trees, every batch holds one request from each of them.
    let config = SearchConfig {
        simulations: 3,
        noise_fraction: 0.0,
        seed: Some(11),
        ..Default::default()
    };

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            bridge.run(&mut Flat {
                total: SIZE * SIZE + 1,
            })
        });
        let handles: Vec<_> = (0..W)
            .map(|_| {
                let bridge = &bridge;
                let config = config.clone();
                scope.spawn(move || {
                    let mut tree = SearchTree::new(SIZE, 0.5, Color::Black, bridge, config).unwrap();
                    let mv = tree.gen_play(false);
                    assert!(mv.point.is_some_and(|pt| pt < 3), "unexpected {mv:?}");
                    tree.play(mv);
                    tree.node_count()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
        bridge.close();
        server.join().unwrap();
    });

    assert_eq!(bridge.batches_evaluated(), 4);
}
