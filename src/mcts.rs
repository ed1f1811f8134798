//! Monte Carlo Tree Search guided by an [`Evaluator`].
//!
//! This module implements evaluator-driven MCTS with:
//! - UCB selection mixing each move's mean value with its prior
//! - One evaluator call per newly reached position, with Dirichlet noise
//!   blended into the priors to keep exploring
//! - Move choice by sampling visit counts under a ply-dependent temperature
//!
//! Nodes live in an append-only vector and refer to their children by index.
//! The root follows the real game forward and nothing is ever pruned, so node
//! ids stay valid for the lifetime of the tree. Values are always "probability
//! that the player to move at this node wins" and flip at every ply.

use anyhow::{Result, anyhow, ensure};
use log::{Level, debug, log, log_enabled};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma};

use crate::board::{BoardState, Color, Move};
use crate::constants::{
    DIRICHLET_ALPHA, EARLY_INV_TEMPERATURE, INVALID_PRIOR, LATE_INV_TEMPERATURE, NOISE_FRACTION,
    SEARCH_COUNT, UNVISITED_VALUE,
};
use crate::evaluator::{Evaluation, Evaluator};

/// Index of a node in the tree's node store.
pub type NodeId = usize;

/// Search parameters.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Simulations run by each [`SearchTree::gen_play`].
    pub simulations: usize,
    /// Concentration of the Dirichlet noise added to new nodes.
    pub dirichlet_alpha: f32,
    /// Share of each prior replaced by noise.
    pub noise_fraction: f32,
    /// Ply from which move sampling turns near-greedy; defaults to the
    /// board size.
    pub temperature_drop_ply: Option<usize>,
    /// Exponent applied to visit counts before the drop ply.
    pub early_inv_temperature: f32,
    /// Exponent applied to visit counts from the drop ply on.
    pub late_inv_temperature: f32,
    /// Seed for the sampling and noise generators; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            simulations: SEARCH_COUNT,
            dirichlet_alpha: DIRICHLET_ALPHA,
            noise_fraction: NOISE_FRACTION,
            temperature_drop_ply: None,
            early_inv_temperature: EARLY_INV_TEMPERATURE,
            late_inv_temperature: LATE_INV_TEMPERATURE,
            seed: None,
        }
    }
}

impl SearchConfig {
    /// Default parameters with a different simulation count.
    pub fn with_simulations(simulations: usize) -> Self {
        Self {
            simulations,
            ..Default::default()
        }
    }
}

/// Statistics for one position, indexed by move id.
pub struct SearchNode {
    /// Blended prior, or [`INVALID_PRIOR`] once the move is found illegal.
    pub prior: Vec<f32>,
    pub count: Vec<u32>,
    /// Sum of backed-up values for the player to move here.
    pub value: Vec<f32>,
    pub child: Vec<Option<NodeId>>,
    pub total_count: u32,
    /// The evaluator's value estimate for this position.
    pub prior_score: f32,
}

impl SearchNode {
    #[inline]
    pub fn is_invalid(&self, m: usize) -> bool {
        self.prior[m] < 0.0
    }

    #[inline]
    pub fn mean_value(&self, m: usize) -> f32 {
        if self.count[m] == 0 {
            UNVISITED_VALUE
        } else {
            self.value[m] / self.count[m] as f32
        }
    }
}

/// Dirichlet samples drawn as normalized Gamma variates.
struct DirichletNoise {
    rng: StdRng,
    gamma: Gamma<f32>,
    sample: Vec<f32>,
}

impl DirichletNoise {
    fn new(alpha: f32, seed: Option<u64>) -> Result<Self> {
        let gamma = Gamma::new(alpha, 1.0)
            .map_err(|err| anyhow!("invalid Dirichlet concentration {alpha}: {err}"))?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            rng,
            gamma,
            sample: Vec::new(),
        })
    }

    fn sample(&mut self, n: usize) -> &[f32] {
        self.sample.clear();
        self.sample
            .extend((0..n).map(|_| self.gamma.sample(&mut self.rng)));
        let sum: f32 = self.sample.iter().sum();
        if sum > 0.0 {
            self.sample.iter_mut().for_each(|x| *x /= sum);
        } else {
            self.sample.fill(1.0 / n as f32);
        }
        &self.sample
    }
}

/// Append-only node storage plus the noise that seasons new nodes.
struct NodeStore {
    nodes: Vec<SearchNode>,
    noise: DirichletNoise,
    noise_fraction: f32,
}

impl NodeStore {
    /// Evaluate `board` for `to_move` and append a node for it.
    ///
    /// Returns the new id and the evaluator's value estimate.
    fn create<E: Evaluator>(
        &mut self,
        evaluator: &E,
        board: &BoardState<'_>,
        to_move: Color,
    ) -> (NodeId, f32) {
        let total = board.total_moves();
        let Evaluation { prior, value } = evaluator.evaluate(board, to_move);
        assert_eq!(
            prior.len(),
            total,
            "evaluator returned {} priors for {total} moves",
            prior.len()
        );

        let fraction = self.noise_fraction;
        let noise = self.noise.sample(total);
        let prior = prior
            .iter()
            .zip(noise)
            .map(|(p, n)| p * (1.0 - fraction) + n * fraction)
            .collect();

        let id = self.nodes.len();
        self.nodes.push(SearchNode {
            prior,
            count: vec![0; total],
            value: vec![0.0; total],
            child: vec![None; total],
            total_count: 0,
            prior_score: value,
        });
        (id, value)
    }
}

/// Search tree for one player over one game.
///
/// The tree owns the authoritative board; simulations only ever touch
/// speculative clones of it, and the game advances through [`play`] and
/// [`opponent_play`].
///
/// [`play`]: SearchTree::play
/// [`opponent_play`]: SearchTree::opponent_play
pub struct SearchTree<E: Evaluator> {
    board: BoardState<'static>,
    color: Color,
    root: NodeId,
    my_turn: bool,
    evaluator: E,
    store: NodeStore,
    history: Vec<Move>,
    rng: fastrand::Rng,
    config: SearchConfig,
}

impl<E: Evaluator> SearchTree<E> {
    /// Create a tree playing `color` on an empty `size`x`size` board.
    pub fn new(size: usize, komi: f32, color: Color, evaluator: E, config: SearchConfig) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&config.noise_fraction),
            "noise fraction {} outside [0, 1]",
            config.noise_fraction
        );
        let noise = DirichletNoise::new(config.dirichlet_alpha, config.seed)?;
        let rng = config
            .seed
            .map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        debug!("search tree for {color} on {size}x{size}, komi {komi}, {config:?}");

        let mut tree = Self {
            board: BoardState::new(size, komi),
            color,
            root: 0,
            my_turn: color == Color::Black,
            evaluator,
            store: NodeStore {
                nodes: Vec::new(),
                noise,
                noise_fraction: config.noise_fraction,
            },
            history: Vec::new(),
            rng,
            config,
        };
        tree.init_root();
        Ok(tree)
    }

    fn init_root(&mut self) {
        let (root, _) = self.store.create(&self.evaluator, &self.board, Color::Black);
        self.root = root;
    }

    /// Start a new game on an empty board, discarding all search results.
    pub fn reset(&mut self) {
        self.board.reset();
        self.my_turn = self.color == Color::Black;
        self.store.nodes.clear();
        self.history.clear();
        self.init_root();
    }

    pub fn board(&self) -> &BoardState<'static> {
        &self.board
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_my_turn(&self) -> bool {
        self.my_turn
    }

    pub fn history(&self) -> &[Move] {
        &self.history
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Id of the node matching the current game position.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &SearchNode {
        &self.store.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.store.nodes.len()
    }

    /// Visit counts of the root's moves. Meaningful right after
    /// [`SearchTree::gen_play`], before the move is played.
    pub fn search_count(&self) -> &[u32] {
        &self.store.nodes[self.root].count
    }

    /// Area score from this tree's point of view.
    pub fn score(&self) -> f32 {
        match self.color {
            Color::Black => self.board.score(),
            Color::White => -self.board.score(),
        }
    }

    /// Search from the current position and pick a move to play.
    ///
    /// The move is sampled with probability proportional to
    /// `visits ^ inv_temperature`. It is not applied; call
    /// [`SearchTree::play`] with it.
    ///
    /// # Panics
    /// If it is not this tree's turn.
    pub fn gen_play(&mut self, debug_log: bool) -> Move {
        assert!(self.my_turn, "{} asked to move out of turn", self.color);
        let last_is_pass = self.history.last().is_some_and(Move::is_pass);
        for _ in 0..self.config.simulations {
            self.search_from(self.root, last_is_pass);
        }
        self.my_turn = false;

        let level = if debug_log { Level::Info } else { Level::Trace };
        let size = self.board.size();
        let inv_temp = self.inv_temperature();
        let node = &self.store.nodes[self.root];
        let weights: Vec<f32> = (0..node.prior.len())
            .map(|m| {
                if node.is_invalid(m) {
                    0.0
                } else {
                    (node.count[m] as f32).powf(inv_temp)
                }
            })
            .collect();

        if log_enabled!(level) {
            log!(level, "\n{}", self.board);
            for m in (0..node.prior.len()).filter(|&m| !node.is_invalid(m)) {
                log!(
                    level,
                    "    {:<6}: prior = {:.4}, count = {:>6}, value = {:.4}",
                    Move::from_id(self.color, m, size).describe(size),
                    node.prior[m],
                    node.count[m],
                    node.mean_value(m)
                );
            }
            log!(level, "    <est. score>: {:.4}", node.prior_score);
        }

        let mv = self.sample(&weights);
        log!(level, "(MCTS)==> play: {}", mv.describe(size));
        mv
    }

    /// Inverse temperature for the current ply.
    fn inv_temperature(&self) -> f32 {
        let drop_ply = self
            .config
            .temperature_drop_ply
            .unwrap_or(self.board.size());
        if self.history.len() < drop_ply {
            self.config.early_inv_temperature
        } else {
            self.config.late_inv_temperature
        }
    }

    /// Draw a move id with probability proportional to `weights`.
    fn sample(&mut self, weights: &[f32]) -> Move {
        let size = self.board.size();
        let sum: f32 = weights.iter().sum();
        if sum <= 0.0 {
            return Move::pass(self.color);
        }
        let mut r = self.rng.f32() * sum;
        let mut last = size * size;
        for (m, &w) in weights.iter().enumerate().filter(|&(_, &w)| w > 0.0) {
            last = m;
            r -= w;
            if r < 0.0 {
                return Move::from_id(self.color, m, size);
            }
        }
        // Rounding left a sliver of mass; the last candidate absorbs it.
        Move::from_id(self.color, last, size)
    }

    /// Play our own move on the authoritative board.
    pub fn play(&mut self, mv: Move) {
        assert_eq!(mv.color, self.color, "play() takes this tree's own moves");
        self.change_state(mv);
        self.my_turn = false;
    }

    /// Play the opponent's move on the authoritative board.
    pub fn opponent_play(&mut self, mv: Move) {
        assert_ne!(mv.color, self.color, "opponent_play() takes the opponent's moves");
        self.change_state(mv);
        self.my_turn = true;
    }

    fn change_state(&mut self, mv: Move) {
        let size = self.board.size();
        assert!(
            self.board.is_valid(mv),
            "illegal move {}\n{}",
            mv.describe(size),
            self.board
        );
        self.board.play(mv);
        self.history.push(mv);

        let m = mv.id(size);
        let child = match self.store.nodes[self.root].child[m] {
            Some(child) => child,
            None => {
                let (child, _) =
                    self.store
                        .create(&self.evaluator, &self.board, mv.color.opposite());
                self.store.nodes[self.root].child[m] = Some(child);
                child
            }
        };
        self.root = child;
    }

    /// Run one simulation from `start` on a fresh speculative board.
    fn search_from(&mut self, start: NodeId, mut last_is_pass: bool) {
        let mut local = self.board.speculative();
        let size = local.size();
        let mut to_move = if self.my_turn {
            self.color
        } else {
            self.color.opposite()
        };

        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut id = start;
        // Value of the last edge for the player who made it.
        let mut value = loop {
            let m = select(&mut self.store.nodes[id], &local, to_move);
            let mv = Move::from_id(to_move, m, size);
            local.play(mv);
            path.push((id, m));

            if mv.is_pass() && last_is_pass {
                let score = local.score();
                let won = match to_move {
                    Color::Black => score >= 0.0,
                    Color::White => score < 0.0,
                };
                break if won { 1.0 } else { 0.0 };
            }
            match self.store.nodes[id].child[m] {
                Some(child) => {
                    id = child;
                    to_move = to_move.opposite();
                    last_is_pass = mv.is_pass();
                }
                None => {
                    let (child, estimate) =
                        self.store.create(&self.evaluator, &local, to_move.opposite());
                    self.store.nodes[id].child[m] = Some(child);
                    break 1.0 - estimate;
                }
            }
        };

        for &(id, m) in path.iter().rev() {
            let node = &mut self.store.nodes[id];
            node.count[m] += 1;
            node.value[m] += value;
            node.total_count += 1;
            value = 1.0 - value;
        }
    }
}

/// Pick the legal move with the highest UCB score; ties go to the lowest id.
///
/// Moves found illegal are marked so they are never examined again.
fn select(node: &mut SearchNode, board: &BoardState<'_>, to_move: Color) -> usize {
    let size = board.size();
    let nsq = (node.total_count as f32).sqrt();
    let mut best = size * size;
    let mut best_ucb = f32::NEG_INFINITY;
    for m in 0..node.prior.len() {
        if node.is_invalid(m) {
            continue;
        }
        if !board.is_valid(Move::from_id(to_move, m, size)) {
            node.prior[m] = INVALID_PRIOR;
            continue;
        }
        let ucb = node.mean_value(m) + node.prior[m] * nsq / (1 + node.count[m]) as f32;
        if ucb > best_ucb {
            best_ucb = ucb;
            best = m;
        }
    }
    best
}
