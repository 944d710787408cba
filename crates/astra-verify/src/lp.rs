//! Dense LP feasibility solver for star predicate systems.
//!
//! Decides whether `P·α ≤ d` has a solution over free variables `α`, and if
//! so returns a witness assignment. This is the only numeric decision
//! procedure in the engine: star emptiness and counterexample sampling both
//! reduce to it.
//!
//! The solver is a general simplex in the Dutertre–de Moura style: one slack
//! variable per constraint row carrying the row's upper bound, a tableau of
//! rows expressing basic variables over non-basic ones, and a repair loop
//! that pivots violated basic variables against suitable non-basic ones.
//! Bland's rule (minimum index for both leaving and entering variable)
//! prevents cycling; a pivot budget bounds the effect of floating-point
//! degeneracy, and exhausting it is an error, never a verdict.

use astra_core::{AstraError, Result};
use ndarray::{Array1, Array2};

/// Absolute tolerance for bound violation and pivot eligibility.
const TOLERANCE: f64 = 1e-9;

/// Outcome of a feasibility query.
#[derive(Debug, Clone)]
pub enum Feasibility {
    /// The system has a solution; the witness satisfies every row.
    Feasible(Array1<f64>),
    /// The system has no solution.
    Infeasible,
}

impl Feasibility {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Feasibility::Feasible(_))
    }
}

/// One-shot feasibility solver for `P·α ≤ d`.
#[derive(Debug, Clone)]
pub struct FeasibilitySolver {
    /// Maximum number of pivots before the query is abandoned with
    /// [`AstraError::LpFailure`].
    pub pivot_budget: usize,
}

impl Default for FeasibilitySolver {
    fn default() -> Self {
        Self {
            pivot_budget: 50_000,
        }
    }
}

/// Tableau row: `basic = Σ coeffs[k] · x_k` over non-basic variables.
///
/// Rows carry no constant term: every constraint enters as `s = P_i·α` with
/// the right-hand side stored as a bound on `s`, and pivoting among
/// constant-free rows keeps them constant-free.
#[derive(Debug, Clone)]
struct TableauRow {
    basic: usize,
    coeffs: Vec<f64>,
}

struct Tableau {
    rows: Vec<TableauRow>,
    /// Upper bound per variable (structural variables are free).
    upper: Vec<Option<f64>>,
    /// Lower bound per variable (unused by the `≤` encoding, kept for the
    /// suitability checks).
    lower: Vec<Option<f64>>,
    /// Current values of non-basic variables; entries of basic variables
    /// are stale and never read because their coefficients are kept at zero.
    values: Vec<f64>,
    /// Maps a variable to the tableau row where it is basic.
    basic_row: Vec<Option<usize>>,
}

impl Tableau {
    fn new(coefs: &Array2<f64>, rhs: &Array1<f64>) -> Self {
        let n = coefs.ncols();
        let m = coefs.nrows();
        let total = n + m;

        let mut rows = Vec::with_capacity(m);
        let mut upper = vec![None; total];
        let mut basic_row = vec![None; total];

        for i in 0..m {
            let mut coeffs = vec![0.0; total];
            for j in 0..n {
                coeffs[j] = coefs[[i, j]];
            }
            let slack = n + i;
            upper[slack] = Some(rhs[i]);
            basic_row[slack] = Some(rows.len());
            rows.push(TableauRow {
                basic: slack,
                coeffs,
            });
        }

        Self {
            rows,
            upper,
            lower: vec![None; total],
            values: vec![0.0; total],
            basic_row,
        }
    }

    fn eval(&self, row: &TableauRow) -> f64 {
        row.coeffs
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| c * v)
            .sum()
    }

    /// Find the violated basic variable with the smallest index (Bland).
    /// Returns (row index, value, violated bound, needs_decrease).
    fn find_violated(&self) -> Option<(usize, f64, f64, bool)> {
        let mut best: Option<(usize, f64, f64, bool)> = None;
        for (idx, row) in self.rows.iter().enumerate() {
            let value = self.eval(row);
            if let Some(u) = self.upper[row.basic] {
                if value > u + TOLERANCE {
                    match best {
                        Some((b, ..)) if self.rows[b].basic <= row.basic => {}
                        _ => best = Some((idx, value, u, true)),
                    }
                    continue;
                }
            }
            if let Some(l) = self.lower[row.basic] {
                if value < l - TOLERANCE {
                    match best {
                        Some((b, ..)) if self.rows[b].basic <= row.basic => {}
                        _ => best = Some((idx, value, l, false)),
                    }
                }
            }
        }
        best
    }

    fn can_increase(&self, var: usize) -> bool {
        match self.upper[var] {
            None => true,
            Some(u) => self.values[var] + TOLERANCE < u,
        }
    }

    fn can_decrease(&self, var: usize) -> bool {
        match self.lower[var] {
            None => true,
            Some(l) => self.values[var] - TOLERANCE > l,
        }
    }

    /// Find the entering non-basic variable with the smallest index that can
    /// move the violated basic variable toward its bound.
    fn find_entering(&self, row: &TableauRow, needs_decrease: bool) -> Option<usize> {
        for (var, &coeff) in row.coeffs.iter().enumerate() {
            if coeff.abs() <= TOLERANCE || self.basic_row[var].is_some() {
                continue;
            }
            let suitable = if needs_decrease {
                (coeff > 0.0 && self.can_decrease(var)) || (coeff < 0.0 && self.can_increase(var))
            } else {
                (coeff > 0.0 && self.can_increase(var)) || (coeff < 0.0 && self.can_decrease(var))
            };
            if suitable {
                return Some(var);
            }
        }
        None
    }

    /// Move the leaving basic variable to `bound`, shift the entering
    /// variable accordingly, and swap their roles in the tableau.
    fn pivot_and_update(&mut self, row_idx: usize, entering: usize, value: f64, bound: f64) {
        let leaving = self.rows[row_idx].basic;
        let coeff = self.rows[row_idx].coeffs[entering];

        self.values[leaving] = bound;
        self.values[entering] += (bound - value) / coeff;

        // Rewrite: leaving = Σ c_k x_k  becomes
        //          entering = leaving/coeff − Σ_{k≠entering} (c_k/coeff) x_k
        let old = std::mem::take(&mut self.rows[row_idx].coeffs);
        let mut rewritten = vec![0.0; old.len()];
        rewritten[leaving] = 1.0 / coeff;
        for (k, &c) in old.iter().enumerate() {
            if k != entering && c != 0.0 {
                rewritten[k] = -c / coeff;
            }
        }
        self.rows[row_idx] = TableauRow {
            basic: entering,
            coeffs: rewritten.clone(),
        };
        self.basic_row[leaving] = None;
        self.basic_row[entering] = Some(row_idx);

        // Substitute the entering variable out of every other row.
        for (idx, row) in self.rows.iter_mut().enumerate() {
            if idx == row_idx {
                continue;
            }
            let c = row.coeffs[entering];
            if c == 0.0 {
                continue;
            }
            row.coeffs[entering] = 0.0;
            for (k, &r) in rewritten.iter().enumerate() {
                if r != 0.0 {
                    row.coeffs[k] += c * r;
                }
            }
        }
    }

    /// Settle stale basic-variable entries and return the full assignment.
    fn assignment(mut self) -> Vec<f64> {
        for idx in 0..self.rows.len() {
            let value = self.eval(&self.rows[idx]);
            self.values[self.rows[idx].basic] = value;
        }
        self.values
    }
}

impl FeasibilitySolver {
    pub fn new(pivot_budget: usize) -> Self {
        Self { pivot_budget }
    }

    /// Decide feasibility of `coefs·α ≤ rhs`.
    ///
    /// The returned witness has the dimension of `coefs`' column count.
    /// An empty system (zero rows) is trivially feasible at the origin.
    pub fn solve(&self, coefs: &Array2<f64>, rhs: &Array1<f64>) -> Result<Feasibility> {
        if coefs.nrows() != rhs.len() {
            return Err(AstraError::DimensionMismatch {
                expected: coefs.nrows(),
                got: rhs.len(),
                context: "LP right-hand side".to_string(),
            });
        }

        let n = coefs.ncols();
        let mut tableau = Tableau::new(coefs, rhs);
        let mut pivots = 0usize;

        loop {
            match tableau.find_violated() {
                None => {
                    let assignment = tableau.assignment();
                    let witness = Array1::from_iter(assignment.into_iter().take(n));
                    return Ok(Feasibility::Feasible(witness));
                }
                Some((row_idx, value, bound, needs_decrease)) => {
                    let entering =
                        match tableau.find_entering(&tableau.rows[row_idx], needs_decrease) {
                            Some(var) => var,
                            None => return Ok(Feasibility::Infeasible),
                        };
                    if pivots >= self.pivot_budget {
                        return Err(AstraError::LpFailure(format!(
                            "pivot budget of {} exhausted",
                            self.pivot_budget
                        )));
                    }
                    tableau.pivot_and_update(row_idx, entering, value, bound);
                    pivots += 1;
                }
            }
        }
    }
}
