//! Go board state with incremental group tracking.
//!
//! This module provides the rules engine used on every simulated move:
//! - Stones are linked into per-group rings through a flat successor array,
//!   so merging two groups is a single swap
//! - Empty points carry a generation marker used by liberty counting and
//!   scoring to visit each point at most once per traversal
//! - A running Zobrist hash plus the set of hashes already produced enforce
//!   positional superko
//! - Scoring follows Tromp-Taylor area rules
//!
//! Points are row-major indices `row * size + col`; row 0 is the bottom row.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::constants::{KOMI, MAX_N, N};
use crate::zobrist::ZOBRIST;

/// A point on the board, as a row-major index.
pub type Point = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// 0 for Black, 1 for White.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    fn letter(self) -> char {
        match self {
            Color::Black => 'B',
            Color::White => 'W',
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "Black"),
            Color::White => write!(f, "White"),
        }
    }
}

/// A move: a color plus either a point or a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub color: Color,
    /// `None` for a pass.
    pub point: Option<Point>,
}

impl Move {
    pub fn at(color: Color, pt: Point) -> Self {
        Self {
            color,
            point: Some(pt),
        }
    }

    pub fn pass(color: Color) -> Self {
        Self { color, point: None }
    }

    /// Build a move from its id on a `size`x`size` board, where `size * size`
    /// is the pass.
    pub fn from_id(color: Color, id: usize, size: usize) -> Self {
        assert!(id <= size * size, "move id {id} out of range for size {size}");
        if id == size * size {
            Self::pass(color)
        } else {
            Self::at(color, id)
        }
    }

    /// Move id in `[0, size * size]`.
    #[inline]
    pub fn id(&self, size: usize) -> usize {
        self.point.unwrap_or(size * size)
    }

    #[inline]
    pub fn is_pass(&self) -> bool {
        self.point.is_none()
    }

    /// Short human-readable form such as `B:c4` or `W:pass`.
    pub fn describe(&self, size: usize) -> String {
        match self.point {
            None => format!("{}:pass", self.color.letter()),
            Some(pt) => {
                let col = (b'a' + (pt % size) as u8) as char;
                format!("{}:{col}{}", self.color.letter(), pt / size + 1)
            }
        }
    }
}

/// Reasons a textual layout cannot be turned into a board.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout has {0} points, which is not a square board of size 1..={max}", max = MAX_N)]
    BadSize(usize),
    #[error("unknown marker {0:?} in layout (expected '.', 'X' or 'O')")]
    BadMarker(char),
    #[error("stone {0} cannot be placed legally")]
    IllegalStone(String),
}

/// Board state: stones, group rings, hash and superko history.
///
/// A board created with [`BoardState::speculative`] borrows its origin's
/// history read-only for the lifetime `'a`; owned boards are `'static`.
#[derive(Clone)]
pub struct BoardState<'a> {
    size: usize,
    stones: Vec<Option<Color>>,
    /// Successor in the group ring; meaningful only for occupied points.
    next: Vec<Point>,
    /// Visit marker; meaningful only for empty points.
    marks: Vec<Cell<u16>>,
    generation: Cell<u16>,
    hash: u64,
    komi: f32,
    seen: HashSet<u64>,
    ancestor: Option<&'a HashSet<u64>>,
}

impl Default for BoardState<'static> {
    fn default() -> Self {
        Self::new(N, KOMI)
    }
}

impl BoardState<'static> {
    /// Create an empty `size`x`size` board. Komi is always credited to White.
    pub fn new(size: usize, komi: f32) -> Self {
        assert!(
            (1..=MAX_N).contains(&size),
            "board size {size} outside 1..={MAX_N}"
        );
        let area = size * size;
        Self {
            size,
            stones: vec![None; area],
            next: (0..area).collect(),
            marks: vec![Cell::new(0); area],
            generation: Cell::new(0),
            hash: 0,
            komi,
            seen: HashSet::new(),
            ancestor: None,
        }
    }

    /// Build a board from a row-major picture, mainly for tests and debugging.
    ///
    /// `.` is empty, `X` black, `O` white; whitespace is ignored. The first
    /// row of text is the top of the board. Stones are replayed as moves from
    /// the bottom-left corner, and each one must be legal at that point.
    pub fn from_layout(layout: &str, komi: f32) -> Result<Self, LayoutError> {
        let cells: Vec<char> = layout.chars().filter(|c| !c.is_whitespace()).collect();
        let size = (1..=MAX_N)
            .find(|s| s * s == cells.len())
            .ok_or(LayoutError::BadSize(cells.len()))?;

        let mut board = Self::new(size, komi);
        for row in 0..size {
            for col in 0..size {
                let color = match cells[(size - 1 - row) * size + col] {
                    '.' => continue,
                    'X' => Color::Black,
                    'O' => Color::White,
                    other => return Err(LayoutError::BadMarker(other)),
                };
                let mv = Move::at(color, board.point(row, col));
                if !board.is_valid(mv) {
                    return Err(LayoutError::IllegalStone(mv.describe(size)));
                }
                board.play(mv);
            }
        }
        Ok(board)
    }
}

impl<'a> BoardState<'a> {
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.size * self.size
    }

    /// Number of move ids, including the pass.
    #[inline]
    pub fn total_moves(&self) -> usize {
        self.area() + 1
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    /// Zobrist hash of the current stone placement.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn point(&self, row: usize, col: usize) -> Point {
        assert!(row < self.size && col < self.size, "({row}, {col}) off the board");
        row * self.size + col
    }

    /// Clear the board and its history. Komi is kept.
    pub fn reset(&mut self) {
        self.stones.fill(None);
        for (pt, next) in self.next.iter_mut().enumerate() {
            *next = pt;
        }
        for mark in &self.marks {
            mark.set(0);
        }
        self.generation.set(0);
        self.hash = 0;
        self.seen.clear();
    }

    /// Clone for speculative play.
    ///
    /// The clone starts with an empty history of its own and consults this
    /// board's history read-only for superko. Branching again from a
    /// speculative board is not supported.
    pub fn speculative(&self) -> BoardState<'_> {
        assert!(
            self.ancestor.is_none(),
            "cannot branch from an already speculative board"
        );
        BoardState {
            size: self.size,
            stones: self.stones.clone(),
            next: self.next.clone(),
            marks: self.marks.clone(),
            generation: self.generation.clone(),
            hash: self.hash,
            komi: self.komi,
            seen: HashSet::new(),
            ancestor: Some(&self.seen),
        }
    }

    #[inline]
    pub fn stone_at(&self, pt: Point) -> Option<Color> {
        self.stones[pt]
    }

    #[inline]
    pub fn has_stone(&self, pt: Point, color: Color) -> bool {
        assert!(pt < self.area(), "point {pt} off the board");
        self.stones[pt] == Some(color)
    }

    /// Check whether `mv` is legal: not occupied, not suicide, and not
    /// recreating any earlier whole-board position (positional superko).
    pub fn is_valid(&self, mv: Move) -> bool {
        let Some(pt) = mv.point else {
            return true;
        };
        debug_assert!(pt < self.area(), "point {pt} off the board");
        if self.stones[pt].is_some() {
            return false;
        }

        // The move stands unless it is suicide; superko is checked after.
        let mut maybe_valid = false;
        let mut captured = [0u64; 4];
        let mut n_captured = 0;
        for n in neighbors(self.size, pt) {
            let Some(color) = self.stones[n] else {
                maybe_valid = true;
                continue;
            };
            let (liberties, group_hash) = self.count_liberty(n);
            debug_assert!(liberties > 0, "group at {n} has no liberties\n{self}");
            if color == mv.color {
                maybe_valid |= liberties > 1;
            } else if liberties == 1 {
                maybe_valid = true;
                // A group touched from several sides is removed once.
                if !captured[..n_captured].contains(&group_hash) {
                    captured[n_captured] = group_hash;
                    n_captured += 1;
                }
            }
        }
        if !maybe_valid {
            return false;
        }

        let candidate = captured[..n_captured]
            .iter()
            .fold(self.hash ^ ZOBRIST.weight(pt, mv.color), |h, g| h ^ g);
        if self.ancestor.is_some_and(|seen| seen.contains(&candidate)) {
            return false;
        }
        !self.seen.contains(&candidate)
    }

    /// Apply a move. Passing leaves the board and history untouched.
    ///
    /// # Panics
    /// If the point is off the board or occupied. In debug builds, also if
    /// the move is otherwise illegal.
    pub fn play(&mut self, mv: Move) {
        let Some(pt) = mv.point else {
            return;
        };
        assert!(pt < self.area(), "point {pt} off the board");
        assert!(
            self.stones[pt].is_none(),
            "{} played on an occupied point",
            mv.describe(self.size)
        );
        debug_assert!(
            self.is_valid(mv),
            "illegal move {}\n{self}",
            mv.describe(self.size)
        );

        let color = mv.color;
        self.hash ^= ZOBRIST.weight(pt, color);
        self.stones[pt] = Some(color);
        self.next[pt] = pt;

        // 1. Splice the new stone into every adjacent friendly ring.
        for n in neighbors(self.size, pt) {
            if self.stones[n] == Some(color) && !self.same_group(pt, n) {
                self.next.swap(pt, n);
            }
        }

        // 2. Remove adjacent enemy groups left without liberties.
        for n in neighbors(self.size, pt) {
            if self.stones[n] == Some(color.opposite()) && self.count_liberty(n).0 == 0 {
                self.hash ^= self.remove_group(n);
            }
        }

        debug_assert!(
            !self.seen.contains(&self.hash),
            "position {:016x} repeated by {}",
            self.hash,
            mv.describe(self.size)
        );
        self.seen.insert(self.hash);
    }

    /// Black's area minus White's area minus komi (Tromp-Taylor).
    ///
    /// An empty region counts for a color only if it borders stones of that
    /// color alone.
    pub fn score(&self) -> f32 {
        let mut count = [0u32; 2];
        let mark = self.next_mark();
        let mut stack = Vec::new();

        for pt in 0..self.area() {
            match self.stones[pt] {
                Some(color) => count[color.index()] += 1,
                None if self.marks[pt].get() != mark => {
                    self.marks[pt].set(mark);
                    stack.push(pt);
                    // bit 0: touches black, bit 1: touches white
                    let mut border = 0u8;
                    let mut region = 0u32;
                    while let Some(p) = stack.pop() {
                        region += 1;
                        for n in neighbors(self.size, p) {
                            match self.stones[n] {
                                Some(color) => border |= 1 << color.index(),
                                None if self.marks[n].get() != mark => {
                                    self.marks[n].set(mark);
                                    stack.push(n);
                                }
                                None => {}
                            }
                        }
                    }
                    match border {
                        1 => count[Color::Black.index()] += region,
                        2 => count[Color::White.index()] += region,
                        _ => {}
                    }
                }
                None => {}
            }
        }
        count[Color::Black.index()] as f32 - count[Color::White.index()] as f32 - self.komi
    }

    /// Liberty count and Zobrist hash of the group containing the stone at `pt`.
    ///
    /// # Panics
    /// If there is no stone at `pt`.
    pub fn count_liberty(&self, pt: Point) -> (u32, u64) {
        let Some(color) = self.stones[pt] else {
            panic!("count_liberty: no stone at {pt}");
        };
        let mark = self.next_mark();
        let mut liberties = 0;
        let mut group_hash = 0;
        let mut p = pt;
        loop {
            group_hash ^= ZOBRIST.weight(p, color);
            for n in neighbors(self.size, p) {
                if self.stones[n].is_none() && self.marks[n].get() != mark {
                    self.marks[n].set(mark);
                    liberties += 1;
                }
            }
            p = self.next[p];
            debug_assert_eq!(self.stones[p], Some(color), "ring of {pt} broken at {p}");
            if p == pt {
                break;
            }
        }
        (liberties, group_hash)
    }

    /// Whether two stones belong to the same group.
    fn same_group(&self, a: Point, b: Point) -> bool {
        if self.stones[a] != self.stones[b] {
            return false;
        }
        let mut p = a;
        loop {
            if p == b {
                return true;
            }
            p = self.next[p];
            if p == a {
                return false;
            }
        }
    }

    /// Take the whole group at `pt` off the board; returns its hash.
    fn remove_group(&mut self, pt: Point) -> u64 {
        let Some(color) = self.stones[pt] else {
            panic!("remove_group: no stone at {pt}");
        };
        let mut group_hash = 0;
        let mut p = pt;
        loop {
            let next = self.next[p];
            self.stones[p] = None;
            self.next[p] = p;
            group_hash ^= ZOBRIST.weight(p, color);
            p = next;
            if p == pt {
                break;
            }
            debug_assert_eq!(self.stones[p], Some(color), "ring of {pt} broken at {p}");
        }
        group_hash
    }

    /// A marker value no empty point currently carries.
    ///
    /// When the counter wraps, every marker is cleared first.
    fn next_mark(&self) -> u16 {
        let generation = self.generation.get().wrapping_add(1);
        if generation != 0 {
            self.generation.set(generation);
            return generation;
        }
        for mark in &self.marks {
            mark.set(0);
        }
        self.generation.set(1);
        1
    }
}

/// Orthogonal neighbors of `pt` on a `size`x`size` board.
#[inline]
fn neighbors(size: usize, pt: Point) -> impl Iterator<Item = Point> {
    let (row, col) = (pt / size, pt % size);
    [
        (row > 0).then(|| pt - size),
        (row + 1 < size).then(|| pt + size),
        (col > 0).then(|| pt - 1),
        (col + 1 < size).then(|| pt + 1),
    ]
    .into_iter()
    .flatten()
}

/// Stones on the left, per-group liberty counts on the right, then the hash.
impl fmt::Display for BoardState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            write!(f, "  ")?;
            for col in 0..self.size {
                write!(f, "{:>2}", (b'a' + col as u8) as char)?;
            }
            write!(f, "   ")?;
            for col in 0..self.size {
                write!(f, "{:>2}", (b'a' + col as u8) as char)?;
            }
            writeln!(f)
        };

        labels(f)?;
        for row in (0..self.size).rev() {
            write!(f, "{:>2}", row + 1)?;
            for col in 0..self.size {
                let ch = match self.stones[row * self.size + col] {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.',
                };
                write!(f, "{ch:>2}")?;
            }
            write!(f, "{:>3}", row + 1)?;
            for col in 0..self.size {
                let pt = row * self.size + col;
                let ch = if self.stones[pt].is_some() {
                    match self.count_liberty(pt).0 {
                        lc @ 0..=9 => (b'0' + lc as u8) as char,
                        lc @ 10..=35 => (b'A' + (lc - 10) as u8) as char,
                        _ => '+',
                    }
                } else {
                    '.'
                };
                write!(f, "{ch:>2}")?;
            }
            writeln!(f, "{:>3}", row + 1)?;
        }
        labels(f)?;
        write!(f, "Hash: {:016x}", self.hash)
    }
}
