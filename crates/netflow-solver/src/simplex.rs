use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::problem::{ConstraintOp, LpProblem, ProblemError};
use crate::solution::{Analysis, ReducedCost, ShadowPrice, Solution, SolutionStatus};

/// Default iteration cap is this multiple of the standardised tableau size
const ITERATION_FACTOR: usize = 50;

/// Anything that can turn an [`LpProblem`] into a [`Solution`].
pub trait LpSolver {
    fn solve(&self, problem: &LpProblem) -> Result<Solution, ProblemError>;
}

/// Bounded-variable two-phase simplex solver.
///
/// Variable bounds never become constraint rows: a non-basic column rests at
/// either its lower or its upper bound. Entering and leaving candidates are
/// chosen by Bland's rule so degenerate problems cannot cycle.
#[derive(Debug, Clone)]
pub struct Solver {
    /// Maximum iterations before giving up; `None` scales with problem size
    max_iterations: Option<usize>,
    /// Wall-clock budget, checked between pivots
    time_limit: Option<Duration>,
    /// Tolerance for pivot elements and reduced costs
    tolerance: f64,
    /// Tolerance for residual infeasibility after phase 1
    feasibility_tolerance: f64,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            max_iterations: None,
            time_limit: None,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
        }
    }
}

impl LpSolver for Solver {
    fn solve(&self, problem: &LpProblem) -> Result<Solution, ProblemError> {
        Solver::solve(self, problem)
    }
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_feasibility_tolerance(mut self, tol: f64) -> Self {
        self.feasibility_tolerance = tol;
        self
    }

    /// Solve the LP problem using the two-phase bounded-variable simplex method
    pub fn solve(&self, problem: &LpProblem) -> Result<Solution, ProblemError> {
        problem.validate()?;

        let mut tableau = self.build_tableau(problem);
        let cap = self
            .max_iterations
            .unwrap_or_else(|| ITERATION_FACTOR * (tableau.num_rows() + tableau.num_columns()).max(1));
        let mut budget = Budget::new(cap, self.time_limit);

        debug!(
            rows = tableau.num_rows(),
            columns = tableau.num_columns(),
            artificials = tableau.num_artificials(),
            max_iterations = cap,
            "starting simplex"
        );

        // Phase 1: drive the artificial variables to zero
        if tableau.num_artificials() > 0 {
            let threshold = self.feasibility_tolerance * (1.0 + tableau.max_abs_rhs());
            let phase_one = tableau.phase_one_costs();
            tableau.set_objective(&phase_one);

            if tableau.infeasibility() > threshold {
                match self.iterate(&mut tableau, &mut budget) {
                    Outcome::Optimal => {}
                    Outcome::Unbounded => {
                        warn!("phase 1 reported an unbounded direction");
                        return Ok(Solution::numerical_failure(budget.iterations));
                    }
                    Outcome::Stalled => return Ok(Solution::numerical_failure(budget.iterations)),
                }
            }

            let infeasibility = tableau.infeasibility();
            debug!(infeasibility, iterations = budget.iterations, "phase 1 finished");
            if infeasibility > threshold {
                return Ok(Solution::infeasible(budget.iterations));
            }

            self.expel_artificials(&mut tableau);
            if !tableau.refresh_values() {
                warn!("tableau lost finiteness while removing artificials");
                return Ok(Solution::numerical_failure(budget.iterations));
            }
        }

        // Phase 2: optimize the real objective from the feasible basis
        let costs = tableau.costs.clone();
        tableau.set_objective(&costs);
        match self.iterate(&mut tableau, &mut budget) {
            Outcome::Optimal => {}
            Outcome::Unbounded => {
                debug!(iterations = budget.iterations, "objective is unbounded");
                return Ok(Solution::unbounded(budget.iterations));
            }
            Outcome::Stalled => return Ok(Solution::numerical_failure(budget.iterations)),
        }

        debug!(iterations = budget.iterations, "phase 2 finished");
        Ok(self.extract_solution(&tableau, problem, budget.iterations))
    }

    fn build_tableau(&self, problem: &LpProblem) -> Tableau {
        // Simplex minimizes, so for maximization we negate the coefficients
        let sense = if problem.objective.minimize { 1.0 } else { -1.0 };

        // Map every variable onto columns with bounds [0, upper]
        let mut column_maps = Vec::with_capacity(problem.num_variables());
        let mut upper = Vec::new();
        let mut costs = Vec::new();
        for (v, &coef) in problem.variables.iter().zip(&problem.objective.coefficients) {
            let cost = sense * coef;
            if v.lower.is_finite() {
                column_maps.push(ColumnMap::Shifted { column: upper.len(), offset: v.lower });
                upper.push(v.upper - v.lower);
                costs.push(cost);
            } else if v.upper.is_finite() {
                column_maps.push(ColumnMap::Mirrored { column: upper.len(), offset: v.upper });
                upper.push(f64::INFINITY);
                costs.push(-cost);
            } else {
                let positive = upper.len();
                column_maps.push(ColumnMap::Split { positive, negative: positive + 1 });
                upper.extend([f64::INFINITY, f64::INFINITY]);
                costs.extend([cost, -cost]);
            }
        }
        let n_structural = upper.len();

        // Count slack and artificial variables needed
        let mut n_slack = 0;
        let mut n_artificial = 0;
        let mut layouts = Vec::with_capacity(problem.num_constraints());
        for c in &problem.constraints {
            let slack = match c.op {
                ConstraintOp::Le => Some(1.0),
                ConstraintOp::Ge => Some(-1.0), // surplus
                ConstraintOp::Eq => None,
            };
            let mut rhs = c.rhs;
            for (j, &coef) in c.coefficients.iter().enumerate() {
                match column_maps[j] {
                    ColumnMap::Shifted { offset, .. } | ColumnMap::Mirrored { offset, .. } => rhs -= coef * offset,
                    ColumnMap::Split { .. } => {}
                }
            }
            // RHS (ensure non-negative)
            let sign = if rhs < 0.0 { -1.0 } else { 1.0 };
            let needs_artificial = slack.is_none_or(|s| s * sign < 0.0);
            if slack.is_some() {
                n_slack += 1;
            }
            if needs_artificial {
                n_artificial += 1;
            }
            layouts.push(RowLayout { slack, sign, rhs: rhs * sign, needs_artificial });
        }

        let n_cols = n_structural + n_slack + n_artificial;
        let mut tableau = Tableau {
            rows: Vec::with_capacity(layouts.len()),
            rhs: Vec::with_capacity(layouts.len()),
            reduced: vec![0.0; n_cols],
            costs: vec![0.0; n_cols],
            basis: Vec::with_capacity(layouts.len()),
            basic_row: vec![None; n_cols],
            at_upper: vec![false; n_cols],
            upper: vec![f64::INFINITY; n_cols],
            kinds: vec![ColumnKind::Structural; n_cols],
            values: Vec::with_capacity(layouts.len()),
            row_signs: Vec::with_capacity(layouts.len()),
            unit_columns: Vec::with_capacity(layouts.len()),
            column_maps,
            sense,
        };
        tableau.upper[..n_structural].copy_from_slice(&upper);
        tableau.costs[..n_structural].copy_from_slice(&costs);

        // Fill in constraint rows
        let mut slack_idx = n_structural;
        let mut artificial_idx = n_structural + n_slack;

        for (c, layout) in problem.constraints.iter().zip(&layouts) {
            let mut row = vec![0.0; n_cols];
            for (j, &coef) in c.coefficients.iter().enumerate() {
                match tableau.column_maps[j] {
                    ColumnMap::Shifted { column, .. } => row[column] += coef,
                    ColumnMap::Mirrored { column, .. } => row[column] -= coef,
                    ColumnMap::Split { positive, negative } => {
                        row[positive] += coef;
                        row[negative] -= coef;
                    }
                }
            }

            let mut basic = artificial_idx;
            if let Some(s) = layout.slack {
                row[slack_idx] = s;
                tableau.kinds[slack_idx] = ColumnKind::Slack;
                if !layout.needs_artificial {
                    basic = slack_idx;
                }
                slack_idx += 1;
            }
            for value in row.iter_mut() {
                *value *= layout.sign;
            }
            if layout.needs_artificial {
                row[artificial_idx] = 1.0;
                tableau.kinds[artificial_idx] = ColumnKind::Artificial;
                artificial_idx += 1;
            }

            tableau.basic_row[basic] = Some(tableau.rows.len());
            tableau.basis.push(basic);
            tableau.unit_columns.push(basic);
            tableau.rows.push(row);
            tableau.rhs.push(layout.rhs);
            tableau.values.push(layout.rhs);
            tableau.row_signs.push(layout.sign);
        }

        tableau
    }

    fn iterate(&self, tableau: &mut Tableau, budget: &mut Budget) -> Outcome {
        loop {
            let Some((col, direction)) = self.select_entering(tableau) else {
                return Outcome::Optimal;
            };
            if budget.exhausted() {
                warn!(iterations = budget.iterations, "simplex budget exhausted");
                return Outcome::Stalled;
            }
            budget.iterations += 1;

            match self.ratio_test(tableau, col, direction) {
                Step::Unbounded => return Outcome::Unbounded,
                Step::Flip => {
                    trace!(col, to_upper = !tableau.at_upper[col], "bound flip");
                    tableau.at_upper[col] = !tableau.at_upper[col];
                }
                Step::Pivot { row, to_upper } => {
                    let leaving = tableau.basis[row];
                    trace!(entering = col, leaving, row, "pivot");
                    tableau.pivot(row, col);
                    tableau.at_upper[col] = false;
                    tableau.at_upper[leaving] = to_upper;
                }
            }

            if !tableau.refresh_values() {
                warn!(iterations = budget.iterations, "tableau lost finiteness");
                return Outcome::Stalled;
            }
        }
    }

    /// Bland's rule: the lowest-index column whose reduced cost improves the objective
    fn select_entering(&self, tableau: &Tableau) -> Option<(usize, f64)> {
        (0..tableau.num_columns()).find_map(|j| {
            if tableau.basic_row[j].is_some() || tableau.upper[j] <= self.tolerance {
                return None;
            }
            let d = tableau.reduced[j];
            if !tableau.at_upper[j] && d < -self.tolerance {
                Some((j, 1.0))
            } else if tableau.at_upper[j] && d > self.tolerance {
                Some((j, -1.0))
            } else {
                None
            }
        })
    }

    /// Minimum-ratio test over both bounds of every basic variable.
    ///
    /// Ties go to the basic variable with the lowest column index. The
    /// entering column flips to its opposite bound when no basic variable
    /// blocks it first.
    fn ratio_test(&self, tableau: &Tableau, col: usize, direction: f64) -> Step {
        let mut best: Option<(usize, f64, bool)> = None;

        for (i, row) in tableau.rows.iter().enumerate() {
            let rate = row[col] * direction;
            let basic = tableau.basis[i];
            let (ratio, to_upper) = if rate > self.tolerance {
                (tableau.values[i].max(0.0) / rate, false)
            } else if rate < -self.tolerance && tableau.upper[basic].is_finite() {
                ((tableau.upper[basic] - tableau.values[i]).max(0.0) / -rate, true)
            } else {
                continue;
            };

            let replace = match best {
                None => true,
                Some((best_row, best_ratio, _)) => {
                    ratio < best_ratio - self.tolerance
                        || (ratio <= best_ratio + self.tolerance && basic < tableau.basis[best_row])
                }
            };
            if replace {
                best = Some((i, ratio, to_upper));
            }
        }

        match best {
            Some((row, ratio, to_upper)) if ratio < tableau.upper[col] => Step::Pivot { row, to_upper },
            Some(_) => Step::Flip,
            None if tableau.upper[col].is_finite() => Step::Flip,
            None => Step::Unbounded,
        }
    }

    /// Pivot zero-valued artificials out of the basis and pin every artificial at zero.
    fn expel_artificials(&self, tableau: &mut Tableau) {
        for row in 0..tableau.num_rows() {
            let leaving = tableau.basis[row];
            if tableau.kinds[leaving] != ColumnKind::Artificial {
                continue;
            }
            let entering = (0..tableau.num_columns()).find(|&j| {
                tableau.kinds[j] != ColumnKind::Artificial
                    && tableau.basic_row[j].is_none()
                    && tableau.rows[row][j].abs() > self.feasibility_tolerance
            });
            match entering {
                Some(col) => {
                    tableau.pivot(row, col);
                    tableau.at_upper[col] = false;
                    tableau.at_upper[leaving] = false;
                }
                None => trace!(row, "redundant row keeps its artificial"),
            }
        }

        for j in 0..tableau.num_columns() {
            if tableau.kinds[j] == ColumnKind::Artificial {
                tableau.upper[j] = 0.0;
            }
        }
    }

    fn extract_solution(&self, tableau: &Tableau, problem: &LpProblem, iterations: usize) -> Solution {
        let columns: Vec<f64> = (0..tableau.num_columns()).map(|j| tableau.column_value(j)).collect();

        // Extract variable values
        let values: Vec<f64> = tableau
            .column_maps
            .iter()
            .map(|map| match *map {
                ColumnMap::Shifted { column, offset } => offset + columns[column],
                ColumnMap::Mirrored { column, offset } => offset - columns[column],
                ColumnMap::Split { positive, negative } => columns[positive] - columns[negative],
            })
            .collect();

        let objective_value = problem.evaluate(&values);
        let analysis = self.analyze(tableau, problem, &values);

        Solution {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            analysis,
            iterations,
        }
    }

    fn analyze(&self, tableau: &Tableau, problem: &LpProblem, values: &[f64]) -> Analysis {
        let shadow_prices = problem
            .constraints
            .iter()
            .enumerate()
            .map(|(i, constraint)| {
                // Row i's dual is minus the reduced cost of its starting unit column
                let dual = -tableau.reduced[tableau.unit_columns[i]];
                ShadowPrice {
                    constraint: constraint.name.clone(),
                    value: clean(tableau.sense * tableau.row_signs[i] * dual, self.tolerance),
                }
            })
            .collect();

        let reduced_costs = problem
            .variables
            .iter()
            .zip(&tableau.column_maps)
            .zip(values)
            .map(|((variable, map), &value)| {
                let (reduced_cost, is_basic) = match *map {
                    ColumnMap::Shifted { column, .. } => {
                        (tableau.sense * tableau.reduced[column], tableau.basic_row[column].is_some())
                    }
                    ColumnMap::Mirrored { column, .. } => {
                        (-tableau.sense * tableau.reduced[column], tableau.basic_row[column].is_some())
                    }
                    ColumnMap::Split { positive, negative } => (
                        tableau.sense * tableau.reduced[positive],
                        tableau.basic_row[positive].is_some() || tableau.basic_row[negative].is_some(),
                    ),
                };
                ReducedCost {
                    variable: variable.name.clone(),
                    value,
                    reduced_cost: clean(reduced_cost, self.tolerance),
                    is_basic,
                }
            })
            .collect();

        let binding_constraints = problem
            .constraints
            .iter()
            .filter(|c| {
                c.op == ConstraintOp::Eq
                    || (c.activity(values) - c.rhs).abs() <= self.feasibility_tolerance * (1.0 + c.rhs.abs())
            })
            .map(|c| c.name.clone())
            .collect();

        Analysis {
            shadow_prices,
            reduced_costs,
            binding_constraints,
        }
    }
}

/// Flush values that are zero up to round-off
fn clean(value: f64, tolerance: f64) -> f64 {
    if value.abs() <= tolerance { 0.0 } else { value }
}

/// How a problem variable maps onto columns with bounds `[0, upper]`
#[derive(Debug, Clone, Copy)]
enum ColumnMap {
    /// x = offset + column
    Shifted { column: usize, offset: f64 },
    /// x = offset - column
    Mirrored { column: usize, offset: f64 },
    /// x = positive - negative
    Split { positive: usize, negative: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Structural,
    Slack,
    Artificial,
}

struct RowLayout {
    slack: Option<f64>,
    sign: f64,
    rhs: f64,
    needs_artificial: bool,
}

struct Tableau {
    /// B^-1 A
    rows: Vec<Vec<f64>>,
    /// B^-1 b
    rhs: Vec<f64>,
    /// Reduced costs of the active objective
    reduced: Vec<f64>,
    /// Phase 2 costs in minimization form
    costs: Vec<f64>,
    basis: Vec<usize>,
    basic_row: Vec<Option<usize>>,
    /// Non-basic columns resting at their upper bound
    at_upper: Vec<bool>,
    upper: Vec<f64>,
    kinds: Vec<ColumnKind>,
    /// Current value of the basic variable in each row
    values: Vec<f64>,
    /// -1 for rows negated to make the RHS non-negative
    row_signs: Vec<f64>,
    /// Column that formed the initial basis of each row, a +1 unit vector in the starting tableau
    unit_columns: Vec<usize>,
    column_maps: Vec<ColumnMap>,
    /// 1 for minimization, -1 for maximization
    sense: f64,
}

impl Tableau {
    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn num_columns(&self) -> usize {
        self.upper.len()
    }

    fn num_artificials(&self) -> usize {
        self.kinds.iter().filter(|k| **k == ColumnKind::Artificial).count()
    }

    fn max_abs_rhs(&self) -> f64 {
        self.rhs.iter().fold(0.0, |acc: f64, b| acc.max(b.abs()))
    }

    fn phase_one_costs(&self) -> Vec<f64> {
        self.kinds
            .iter()
            .map(|k| if *k == ColumnKind::Artificial { 1.0 } else { 0.0 })
            .collect()
    }

    /// Sum of the artificial variables currently in the basis
    fn infeasibility(&self) -> f64 {
        self.basis
            .iter()
            .zip(&self.values)
            .filter(|(col, _)| self.kinds[**col] == ColumnKind::Artificial)
            .map(|(_, value)| value.max(0.0))
            .sum()
    }

    /// Load new costs and price out the basic columns
    fn set_objective(&mut self, costs: &[f64]) {
        self.reduced.copy_from_slice(costs);
        for (row, &basic) in self.rows.iter().zip(&self.basis) {
            let cb = costs[basic];
            if cb != 0.0 {
                for (d, a) in self.reduced.iter_mut().zip(row) {
                    *d -= cb * a;
                }
            }
        }
    }

    fn pivot(&mut self, row: usize, col: usize) {
        // Scale pivot row
        let pivot_val = self.rows[row][col];
        for value in self.rows[row].iter_mut() {
            *value /= pivot_val;
        }
        self.rhs[row] /= pivot_val;

        // Eliminate column in other rows
        let pivot_row = std::mem::take(&mut self.rows[row]);
        let pivot_rhs = self.rhs[row];
        for (i, other) in self.rows.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = other[col];
            if factor != 0.0 {
                for (value, p) in other.iter_mut().zip(&pivot_row) {
                    *value -= factor * p;
                }
                other[col] = 0.0;
                self.rhs[i] -= factor * pivot_rhs;
            }
        }
        let factor = self.reduced[col];
        if factor != 0.0 {
            for (d, p) in self.reduced.iter_mut().zip(&pivot_row) {
                *d -= factor * p;
            }
            self.reduced[col] = 0.0;
        }
        self.rows[row] = pivot_row;

        // Update basic variable
        let leaving = self.basis[row];
        self.basic_row[leaving] = None;
        self.basic_row[col] = Some(row);
        self.basis[row] = col;
    }

    /// Recompute basic values as B^-1 b minus the contribution of columns at their upper bound.
    /// Returns false if any value is no longer finite.
    fn refresh_values(&mut self) -> bool {
        let raised: Vec<usize> = (0..self.num_columns())
            .filter(|&j| self.at_upper[j] && self.basic_row[j].is_none())
            .collect();
        for (i, row) in self.rows.iter().enumerate() {
            let shift: f64 = raised.iter().map(|&j| row[j] * self.upper[j]).sum();
            self.values[i] = self.rhs[i] - shift;
        }
        self.values.iter().all(|v| v.is_finite())
    }

    fn column_value(&self, j: usize) -> f64 {
        match self.basic_row[j] {
            Some(row) => self.values[row],
            None if self.at_upper[j] => self.upper[j],
            None => 0.0,
        }
    }
}

struct Budget {
    iterations: usize,
    max_iterations: usize,
    deadline: Option<Instant>,
}

impl Budget {
    fn new(max_iterations: usize, time_limit: Option<Duration>) -> Self {
        Self {
            iterations: 0,
            max_iterations,
            deadline: time_limit.map(|limit| Instant::now() + limit),
        }
    }

    fn exhausted(&self) -> bool {
        self.iterations >= self.max_iterations || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

enum Outcome {
    Optimal,
    Unbounded,
    /// Budget exhausted or the tableau lost finiteness
    Stalled,
}

enum Step {
    Flip,
    Pivot { row: usize, to_upper: bool },
    Unbounded,
}
