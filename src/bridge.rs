//! Batching bridge between many search workers and one batched evaluator.
//!
//! Each worker thread runs its own [`SearchTree`](crate::mcts::SearchTree)
//! and calls [`Evaluator::evaluate`] on a shared bridge. The bridge packs
//! requests into fixed-size batches, hands every full batch to the single
//! thread inside [`BatchingBridge::run`], and returns each worker its own row
//! of the result.
//!
//! Requests are spread over [`BATCH_COPIES`] rotating buffers by ticket, so
//! workers can fill the next buffer while the previous one is evaluated.
//! The number of workers must stay within `[W, 2W)` for a batch size `W`:
//! fewer workers can never fill a batch, and with more, two buffers could be
//! ready at once.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::board::{BoardState, Color};
use crate::constants::{BATCH_COPIES, MAX_N, PLANES};
use crate::evaluator::{Evaluation, Evaluator, encode_board};

/// Output of one batched evaluation.
///
/// `prior` is a row-major `prior_shape.0 x prior_shape.1` matrix and `value`
/// a `value_shape.0 x value_shape.1` column.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutput {
    pub prior: Vec<f32>,
    pub prior_shape: (usize, usize),
    pub value: Vec<f32>,
    pub value_shape: (usize, usize),
}

impl BatchOutput {
    /// Wrap flat data for `batch_size` rows of `total_moves` priors each.
    pub fn new(prior: Vec<f32>, value: Vec<f32>, batch_size: usize, total_moves: usize) -> Self {
        Self {
            prior,
            prior_shape: (batch_size, total_moves),
            value,
            value_shape: (batch_size, 1),
        }
    }
}

/// The expensive model behind the bridge.
pub trait BatchEvaluator {
    /// Evaluate `batch_size` rows of `PLANES * N * N` input values.
    fn evaluate_batch(&mut self, input: &[f32], batch_size: usize) -> anyhow::Result<BatchOutput>;
}

/// Malformed batch output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("prior has shape {actual:?}, expected {expected:?}")]
    PriorShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("value has shape {actual:?}, expected {expected:?}")]
    ValueShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("prior holds {actual} values but its shape needs {expected}")]
    PriorLength { expected: usize, actual: usize },
    #[error("value holds {actual} values but its shape needs {expected}")]
    ValueLength { expected: usize, actual: usize },
}

/// Counting semaphore.
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self, n: usize) {
        *self.permits.lock() += n;
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }
}

struct BatchData {
    input: Vec<f32>,
    prior: Vec<f32>,
    value: Vec<f32>,
}

/// One rotating buffer of `W` rows.
struct Buffer {
    /// Free rows; a full buffer admits nobody until it is drained.
    admission: Semaphore,
    filled: AtomicUsize,
    drained: AtomicUsize,
    /// Posted `W` times once the output is stored.
    results: Semaphore,
    data: Mutex<BatchData>,
}

pub struct BatchingBridge {
    board_size: usize,
    batch_size: usize,
    buffers: Vec<Buffer>,
    ticket: AtomicU64,
    /// Buffer waiting for the evaluator thread, if any.
    ready: Mutex<Option<usize>>,
    ready_signal: Semaphore,
    closed: AtomicBool,
    batches: AtomicU64,
}

impl BatchingBridge {
    /// Create a bridge for `board_size` boards and batches of `batch_size`.
    ///
    /// # Panics
    /// If the board size is unsupported or the batch size is zero.
    pub fn new(board_size: usize, batch_size: usize) -> Self {
        assert!(
            (1..=MAX_N).contains(&board_size),
            "board size {board_size} outside 1..={MAX_N}"
        );
        assert!(batch_size > 0, "batch size must be positive");
        let area = board_size * board_size;
        let buffers = (0..BATCH_COPIES)
            .map(|_| Buffer {
                admission: Semaphore::new(batch_size),
                filled: AtomicUsize::new(0),
                drained: AtomicUsize::new(0),
                results: Semaphore::new(0),
                data: Mutex::new(BatchData {
                    input: vec![0.0; batch_size * PLANES * area],
                    prior: vec![0.0; batch_size * (area + 1)],
                    value: vec![0.0; batch_size],
                }),
            })
            .collect();
        debug!("batching bridge for {board_size}x{board_size}, batch size {batch_size}");
        Self {
            board_size,
            batch_size,
            buffers,
            ticket: AtomicU64::new(0),
            ready: Mutex::new(None),
            ready_signal: Semaphore::new(0),
            closed: AtomicBool::new(false),
            batches: AtomicU64::new(0),
        }
    }

    pub fn board_size(&self) -> usize {
        self.board_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Recommended number of worker threads.
    pub fn worker_thread_count(&self) -> usize {
        self.batch_size * 3 / 2
    }

    /// Number of batches handed to the evaluator so far.
    pub fn batches_evaluated(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Check that `output` has the shape of a full batch.
    pub fn validate(&self, output: &BatchOutput) -> Result<(), BridgeError> {
        let total = self.board_size * self.board_size + 1;
        let prior_shape = (self.batch_size, total);
        if output.prior_shape != prior_shape {
            return Err(BridgeError::PriorShape {
                expected: prior_shape,
                actual: output.prior_shape,
            });
        }
        let value_shape = (self.batch_size, 1);
        if output.value_shape != value_shape {
            return Err(BridgeError::ValueShape {
                expected: value_shape,
                actual: output.value_shape,
            });
        }
        let expected = prior_shape.0 * prior_shape.1;
        if output.prior.len() != expected {
            return Err(BridgeError::PriorLength {
                expected,
                actual: output.prior.len(),
            });
        }
        if output.value.len() != self.batch_size {
            return Err(BridgeError::ValueLength {
                expected: self.batch_size,
                actual: output.value.len(),
            });
        }
        Ok(())
    }

    /// Serve batches until [`close`](Self::close) is called.
    ///
    /// Must run on exactly one thread. A failing or malformed evaluation
    /// leaves workers without results, so it aborts the process.
    pub fn run<B: BatchEvaluator>(&self, evaluator: &mut B) {
        loop {
            self.ready_signal.acquire();
            if self.closed.load(Ordering::Acquire) {
                debug!(
                    "batching bridge closed after {} batches",
                    self.batches_evaluated()
                );
                return;
            }
            let Some(index) = self.ready.lock().take() else {
                continue;
            };
            let buffer = &self.buffers[index];
            {
                let mut data = buffer.data.lock();
                let output = evaluator
                    .evaluate_batch(&data.input, self.batch_size)
                    .and_then(|output| {
                        self.validate(&output)?;
                        Ok(output)
                    });
                match output {
                    Ok(output) => {
                        data.prior = output.prior;
                        data.value = output.value;
                    }
                    Err(err) => {
                        error!("batch evaluation failed: {err:#}");
                        std::process::abort();
                    }
                }
            }
            let n = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("evaluated batch {n} from buffer {index}");
            buffer.results.release(self.batch_size);
        }
    }

    /// Stop [`run`](Self::run). Workers must be finished first.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready_signal.release(1);
    }

    fn publish(&self, index: usize) {
        {
            let mut ready = self.ready.lock();
            assert!(
                ready.is_none(),
                "buffer {index} filled while another batch is pending; too many workers for batch size {}",
                self.batch_size
            );
            *ready = Some(index);
        }
        self.ready_signal.release(1);
    }
}

impl Evaluator for BatchingBridge {
    fn evaluate(&self, board: &BoardState<'_>, to_move: Color) -> Evaluation {
        assert_eq!(board.size(), self.board_size, "board size does not match the bridge");
        let w = self.batch_size;
        let area = board.area();
        let total = area + 1;

        let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        let slot = (ticket % (w * BATCH_COPIES) as u64) as usize;
        let (index, row) = (slot / w, slot % w);
        let buffer = &self.buffers[index];

        buffer.admission.acquire();
        {
            let mut data = buffer.data.lock();
            let stride = PLANES * area;
            encode_board(board, to_move, &mut data.input[row * stride..(row + 1) * stride]);
        }
        if buffer.filled.fetch_add(1, Ordering::AcqRel) + 1 == w {
            buffer.filled.store(0, Ordering::Release);
            self.publish(index);
        }

        buffer.results.acquire();
        let evaluation = {
            let data = buffer.data.lock();
            Evaluation {
                prior: data.prior[row * total..(row + 1) * total].to_vec(),
                value: data.value[row],
            }
        };
        if buffer.drained.fetch_add(1, Ordering::AcqRel) + 1 == w {
            buffer.drained.store(0, Ordering::Release);
            buffer.admission.release(w);
        }
        evaluation
    }
}
