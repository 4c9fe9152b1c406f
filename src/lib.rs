//! A constraint-satisfaction engine for filling crossword grids: each slot in
//! the grid is a variable, each variable's domain is drawn from a shared
//! vocabulary, and a solution assigns one word per slot such that crossing
//! slots agree on their shared letter and no word is used twice. The engine
//! establishes node and arc consistency (AC-3) before running a backtracking
//! search guided by the MRV/degree and least-constraining-value heuristics.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, trace};
use smallvec::SmallVec;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// A word from the vocabulary. Overlap checks index into the word by byte, so
/// the loader keeps the vocabulary lowercase ASCII.
pub type Word = String;

/// Zero-indexed row and column coords for a cell in the grid, where row = 0
/// is the top row.
type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A slot in the grid that needs to be filled with a word of a fixed length.
/// Equality and hashing are structural, since variables are used as map keys
/// and set members throughout the solving process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Variable {
    /// Generate the coords for each cell of this slot, in word order.
    pub fn cells(&self) -> SmallVec<[GridCoord; MAX_SLOT_LENGTH]> {
        (0..self.length)
            .map(|cell_idx| match self.direction {
                Direction::Across => (self.row, self.col + cell_idx),
                Direction::Down => (self.row + cell_idx, self.col),
            })
            .collect()
    }
}

/// The static description of a puzzle: grid dimensions, the fillable-cell
/// mask, the derived slots, the pairwise overlap table, and the vocabulary.
/// Built once by [`Puzzle::parse`] and read-only afterwards; the solver
/// assumes the structure is internally consistent and doesn't re-validate it.
pub struct Puzzle {
    pub height: usize,
    pub width: usize,
    /// Which cells are fillable, indexed by `row * width + col`.
    fillable: BitSet,
    pub variables: Vec<Variable>,
    /// For each ordered pair of crossing slots `(x, y)`, the cell indices
    /// `(ix, iy)` such that character `ix` of x's word and character `iy` of
    /// y's word occupy the shared cell. Non-crossing pairs are absent.
    overlaps: HashMap<(Variable, Variable), (usize, usize)>,
    neighbors: HashMap<Variable, Vec<Variable>>,
    pub vocabulary: HashSet<Word>,
}

impl Debug for Puzzle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puzzle")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("variables", &self.variables)
            .field("vocabulary", &(["(", &self.vocabulary.len().to_string(), " words)"].join("")))
            .finish()
    }
}

impl Puzzle {
    /// Build a puzzle from a structure template and a word list.
    ///
    /// In the template, `.` and `_` mark fillable cells and any other
    /// character marks a block; blank lines and surrounding whitespace are
    /// ignored, and short lines are padded with blocks. Every maximal run of
    /// two or more fillable cells (across or down) becomes a slot. The word
    /// list holds one word per line and is lowercased; no other normalization
    /// is applied.
    pub fn parse(structure: &str, word_list: &str) -> Puzzle {
        let rows: Vec<Vec<char>> = structure
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.chars().collect())
                }
            })
            .collect();

        let height = rows.len();
        let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);

        let mut fillable = BitSet::with_capacity(height * width);
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, &cell) in row.iter().enumerate() {
                if cell == '.' || cell == '_' {
                    fillable.insert(row_idx * width + col_idx);
                }
            }
        }

        let variables = derive_variables(&fillable, height, width);

        // Build a map from cell location to the slots passing through it,
        // which gives us both the overlap table and the neighbor lists.
        let mut slots_by_cell: HashMap<GridCoord, Vec<(Variable, usize)>> = HashMap::new();
        for &variable in &variables {
            for (cell_idx, coord) in variable.cells().into_iter().enumerate() {
                slots_by_cell.entry(coord).or_default().push((variable, cell_idx));
            }
        }

        let mut overlaps: HashMap<(Variable, Variable), (usize, usize)> = HashMap::new();
        let mut neighbors: HashMap<Variable, Vec<Variable>> =
            variables.iter().map(|&variable| (variable, vec![])).collect();

        // A cell is shared by at most two slots (one across, one down), since
        // runs within a single row or column never overlap each other.
        for crossing_slots in slots_by_cell.values() {
            if let [(x, ix), (y, iy)] = crossing_slots[..] {
                overlaps.insert((x, y), (ix, iy));
                overlaps.insert((y, x), (iy, ix));
                neighbors.get_mut(&x).unwrap().push(y);
                neighbors.get_mut(&y).unwrap().push(x);
            }
        }

        let vocabulary: HashSet<Word> = word_list
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.to_lowercase())
                }
            })
            .collect();

        Puzzle { height, width, fillable, variables, overlaps, neighbors, vocabulary }
    }

    /// Is the given cell fillable (as opposed to a block)?
    pub fn is_fillable(&self, row: usize, col: usize) -> bool {
        self.fillable.contains(row * self.width + col)
    }

    /// The overlap between two slots: `Some((ix, iy))` if character `ix` of
    /// x's word must equal character `iy` of y's word, `None` if the slots
    /// don't cross.
    pub fn overlap(&self, x: &Variable, y: &Variable) -> Option<(usize, usize)> {
        self.overlaps.get(&(*x, *y)).copied()
    }

    /// All slots that cross the given slot.
    pub fn neighbors(&self, variable: &Variable) -> &[Variable] {
        self.neighbors.get(variable).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Scan the fillable-cell mask for maximal runs of two or more cells, across
/// then down.
fn derive_variables(fillable: &BitSet, height: usize, width: usize) -> Vec<Variable> {
    let open = |row: usize, col: usize| fillable.contains(row * width + col);
    let mut variables: Vec<Variable> = vec![];

    for row in 0..height {
        let mut col = 0;
        while col < width {
            if open(row, col) && (col == 0 || !open(row, col - 1)) {
                let mut length = 1;
                while col + length < width && open(row, col + length) {
                    length += 1;
                }
                if length > 1 {
                    variables.push(Variable { row, col, direction: Direction::Across, length });
                }
                col += length;
            } else {
                col += 1;
            }
        }
    }

    for col in 0..width {
        let mut row = 0;
        while row < height {
            if open(row, col) && (row == 0 || !open(row - 1, col)) {
                let mut length = 1;
                while row + length < height && open(row + length, col) {
                    length += 1;
                }
                if length > 1 {
                    variables.push(Variable { row, col, direction: Direction::Down, length });
                }
                row += length;
            } else {
                row += 1;
            }
        }
    }

    variables
}

/// A struct tracking statistics about the solving process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A struct representing the results of a successful solve.
#[derive(Debug)]
pub struct Solution {
    pub assignment: HashMap<Variable, Word>,
    pub statistics: Statistics,
}

/// Why a solve produced no assignment. Both variants are ordinary negative
/// outcomes rather than errors: the puzzle just has no solution under the
/// given vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    /// Some slot's domain emptied during consistency filtering, before the
    /// search even started.
    DomainWipeout,
    /// The search exhausted every branch without completing an assignment.
    SearchExhausted,
}

/// A single solving session over a puzzle: owns the mutable domain store and
/// runs consistency filtering plus backtracking search against the puzzle's
/// static description. Domains only ever shrink during propagation; the
/// search narrows them to singletons one branch at a time and restores them
/// on the way back out.
pub struct Solver<'a> {
    puzzle: &'a Puzzle,
    domains: HashMap<Variable, HashSet<Word>>,
    statistics: Statistics,
}

impl<'a> Solver<'a> {
    /// Start a session with every slot's domain initialized to the full
    /// vocabulary.
    pub fn new(puzzle: &'a Puzzle) -> Solver<'a> {
        Solver {
            puzzle,
            domains: puzzle
                .variables
                .iter()
                .map(|&variable| (variable, puzzle.vocabulary.clone()))
                .collect(),
            statistics: Statistics { states: 0, backtracks: 0, duration: Duration::from_millis(0) },
        }
    }

    /// Enforce node and arc consistency, then search for a complete
    /// assignment. Consumes the session, since the domain store is only
    /// meaningful within a single solve.
    pub fn solve(mut self) -> Result<Solution, SolveFailure> {
        let start = Instant::now();

        self.enforce_node_consistency();

        // A slot with no word of the right length fails immediately, without
        // invoking the search. AC-3 alone wouldn't notice if the slot has no
        // crossings, so this is checked up front.
        if self.domains.values().any(|domain| domain.is_empty()) {
            debug!("a domain emptied during node-consistency filtering");
            return Err(SolveFailure::DomainWipeout);
        }

        if !self.ac3(None) {
            return Err(SolveFailure::DomainWipeout);
        }

        let mut assignment: HashMap<Variable, Word> =
            HashMap::with_capacity(self.puzzle.variables.len());
        let solved = self.backtrack(&mut assignment);

        self.statistics.duration = start.elapsed();
        debug!(
            "search visited {} states with {} backtracks in {:?}",
            self.statistics.states, self.statistics.backtracks, self.statistics.duration
        );

        if solved {
            Ok(Solution { assignment, statistics: self.statistics })
        } else {
            Err(SolveFailure::SearchExhausted)
        }
    }

    /// Remove from every slot's domain the words whose length doesn't match
    /// the slot. Idempotent; this is the only unary constraint.
    pub fn enforce_node_consistency(&mut self) {
        for (variable, domain) in self.domains.iter_mut() {
            domain.retain(|word| word.len() == variable.length);
        }
    }

    /// Make slot `x` arc-consistent with slot `y`: drop every word in x's
    /// domain that has no supporting word in y's domain, where support means
    /// agreeing at the overlap and being a different word (the same word can
    /// never fill both slots). Returns whether anything was removed; slots
    /// that don't cross are left untouched.
    ///
    /// Both domains must already be node-consistent: candidates are indexed
    /// at the overlap positions, so every word has to span its slot.
    pub fn revise(&mut self, x: &Variable, y: &Variable) -> bool {
        let (ix, iy) = match self.puzzle.overlap(x, y) {
            Some(overlap) => overlap,
            None => return false,
        };

        // Filter x's domain against a snapshot of y's. Taking x's set out of
        // the map keeps the revision stable and sidesteps borrowing two
        // entries of the same map at once.
        let mut domain_x = self.domains.remove(x).unwrap();
        let domain_y = &self.domains[y];

        let before = domain_x.len();
        domain_x.retain(|word_x| {
            domain_y
                .iter()
                .any(|word_y| word_x != word_y && word_x.as_bytes()[ix] == word_y.as_bytes()[iy])
        });
        let revised = domain_x.len() < before;

        self.domains.insert(*x, domain_x);
        revised
    }

    /// Run the AC-3 propagation loop until every arc is consistent, starting
    /// from the given arcs or, if none are given, from every ordered pair of
    /// crossing slots. Whenever revising an arc `(x, y)` shrinks x's domain,
    /// every arc `(z, x)` for the other neighbors `z` of x goes back on the
    /// worklist, since the shrinkage may have invalidated their support.
    ///
    /// Returns `false` as soon as any domain empties (the puzzle is
    /// unsolvable under the current domains); returns `true` once the
    /// worklist drains, at which point the domains are the unique maximal
    /// arc-consistent subsets of their starting values.
    ///
    /// Like [`Solver::revise`], this expects [`Solver::enforce_node_consistency`]
    /// to have run first.
    pub fn ac3(&mut self, arcs: Option<Vec<(Variable, Variable)>>) -> bool {
        let mut queue: VecDeque<(Variable, Variable)> = match arcs {
            Some(arcs) => arcs.into(),
            None => self
                .puzzle
                .variables
                .iter()
                .flat_map(|&x| self.puzzle.neighbors(&x).iter().map(move |&y| (x, y)))
                .collect(),
        };

        while let Some((x, y)) = queue.pop_front() {
            if !self.revise(&x, &y) {
                continue;
            }

            if self.domains[&x].is_empty() {
                debug!("domain of {:?} wiped out while revising against {:?}", x, y);
                return false;
            }

            for &z in self.puzzle.neighbors(&x) {
                if z != y {
                    queue.push_back((z, x));
                }
            }
        }

        true
    }

    /// Does the given partial assignment violate no constraint? Checks that
    /// assigned words are pairwise distinct, that each word fits its slot's
    /// length, and that every assigned pair of crossing slots agrees on the
    /// shared letter. Pure predicate over any assignment.
    pub fn consistent(&self, assignment: &HashMap<Variable, Word>) -> bool {
        // Lengths are checked for the whole assignment up front: the overlap
        // check below indexes into the neighbor's word, which is only in
        // bounds once that word is known to span its slot.
        if assignment.iter().any(|(variable, word)| word.len() != variable.length) {
            return false;
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(assignment.len());

        for (variable, word) in assignment {
            if !seen.insert(word.as_str()) {
                return false;
            }

            for neighbor in self.puzzle.neighbors(variable) {
                if let Some(other) = assignment.get(neighbor) {
                    // Neighbor lists only contain slots with a recorded
                    // overlap.
                    let (ix, iy) = self.puzzle.overlap(variable, neighbor).unwrap();
                    if word.as_bytes()[ix] != other.as_bytes()[iy] {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Choose which unassigned slot to fill next: fewest remaining domain
    /// values first (MRV), ties broken by most crossings (degree). Remaining
    /// ties fall to whichever qualifying slot comes first in the puzzle's
    /// slot order.
    ///
    /// Only meaningful while at least one slot is unassigned.
    pub fn select_unassigned_variable(&self, assignment: &HashMap<Variable, Word>) -> Variable {
        *self
            .puzzle
            .variables
            .iter()
            .filter(|variable| !assignment.contains_key(variable))
            .min_by_key(|&&variable| {
                (self.domains[&variable].len(), Reverse(self.puzzle.neighbors(&variable).len()))
            })
            .expect("select_unassigned_variable called with a complete assignment")
    }

    /// Order the remaining domain values for a slot by how constraining they
    /// are: for each candidate, count the domain values it would rule out
    /// across the slot's unassigned neighbors, and put the least-constraining
    /// candidates first. Ties keep lexicographic order so the ordering is
    /// stable across runs.
    pub fn order_domain_values(
        &self,
        variable: &Variable,
        assignment: &HashMap<Variable, Word>,
    ) -> Vec<Word> {
        let unassigned_neighbors: Vec<Variable> = self
            .puzzle
            .neighbors(variable)
            .iter()
            .copied()
            .filter(|neighbor| !assignment.contains_key(neighbor))
            .collect();

        let mut values: Vec<Word> = self.domains[variable].iter().cloned().collect();
        values.sort();
        values.sort_by_cached_key(|value| {
            unassigned_neighbors
                .iter()
                .map(|neighbor| {
                    let (ix, iy) = self.puzzle.overlap(variable, neighbor).unwrap();
                    self.domains[neighbor]
                        .iter()
                        .filter(|other| value.as_bytes()[ix] != other.as_bytes()[iy])
                        .count()
                })
                .sum::<usize>()
        });

        values
    }

    /// Depth-first search over partial assignments. Returns `true` once the
    /// assignment is complete, leaving it in place; returns `false` if no
    /// candidate value for the selected slot leads to a complete assignment,
    /// leaving the assignment as it was on entry.
    ///
    /// While a candidate is being explored, the slot's domain is narrowed to
    /// just that word so that nested heuristic calls see the hypothesis. The
    /// saved domain is put back on every exit path from the recursive call,
    /// success or failure; a failed branch must not leak narrowed domains
    /// into its siblings or into ancestor backtracking.
    pub fn backtrack(&mut self, assignment: &mut HashMap<Variable, Word>) -> bool {
        if assignment.len() == self.puzzle.variables.len() {
            return true;
        }

        self.statistics.states += 1;

        let variable = self.select_unassigned_variable(assignment);

        for value in self.order_domain_values(&variable, assignment) {
            trace!("trying {:?} = {:?}", variable, value);
            assignment.insert(variable, value.clone());

            if self.consistent(assignment) {
                let saved = self.domains.insert(variable, HashSet::from([value])).unwrap();
                let solved = self.backtrack(assignment);
                self.domains.insert(variable, saved);

                if solved {
                    return true;
                }
            }

            assignment.remove(&variable);
        }

        self.statistics.backtracks += 1;
        false
    }
}

/// Turn the given puzzle and assignment into a rendered string, with blocks
/// drawn as `█` and unassigned fillable cells left blank.
pub fn render_grid(puzzle: &Puzzle, assignment: &HashMap<Variable, Word>) -> String {
    let mut letters: Vec<Vec<Option<char>>> = vec![vec![None; puzzle.width]; puzzle.height];

    for (variable, word) in assignment {
        for (cell_idx, (row, col)) in variable.cells().into_iter().enumerate() {
            letters[row][col] = Some(word.as_bytes()[cell_idx] as char);
        }
    }

    (0..puzzle.height)
        .map(|row| {
            (0..puzzle.width)
                .map(|col| {
                    if puzzle.is_fillable(row, col) {
                        letters[row][col].unwrap_or(' ')
                    } else {
                        '█'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
