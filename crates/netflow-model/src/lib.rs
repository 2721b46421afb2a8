pub mod error;
pub mod formulate;
pub mod graph;
pub mod report;

#[cfg(feature = "serde")]
pub mod data;

use std::thread;
use std::time::Duration;

use netflow_solver::{LpSolver, Solver};
use tracing::info;

pub use error::Error;
pub use formulate::{Formulation, TOTAL_FLOW, Variant, formulate};
pub use graph::{Arc, GraphModel, GraphModelBuilder, Node, Role, ValidationError};
pub use report::{ArcFlow, MinCut, Optimum, SolveResult, min_cut, report};

#[cfg(feature = "serde")]
pub use data::{ArcData, DataError, NetworkData};

/// Knobs for a single solve
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Overrides the size-scaled default iteration cap
    pub max_iterations: Option<usize>,
    pub time_limit: Option<Duration>,
    pub tolerance: f64,
    /// Residual infeasibility accepted at the end of phase 1
    pub feasibility_tolerance: f64,
    /// Derive a minimum cut for optimal max-flow results
    pub min_cut: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            time_limit: None,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
            min_cut: false,
        }
    }
}

impl SolveOptions {
    pub fn solver(&self) -> Solver {
        let mut solver = Solver::new()
            .with_tolerance(self.tolerance)
            .with_feasibility_tolerance(self.feasibility_tolerance);
        if let Some(max) = self.max_iterations {
            solver = solver.with_max_iterations(max);
        }
        if let Some(limit) = self.time_limit {
            solver = solver.with_time_limit(limit);
        }
        solver
    }
}

/// Solve `model` as the given variant with default options
pub fn solve(model: &GraphModel, variant: Variant) -> Result<SolveResult, Error> {
    solve_with(model, variant, &SolveOptions::default())
}

pub fn solve_with(model: &GraphModel, variant: Variant, options: &SolveOptions) -> Result<SolveResult, Error> {
    solve_using(&options.solver(), model, variant, options.min_cut)
}

/// Formulate, solve with `solver` and map the solution back onto the network
pub fn solve_using<S: LpSolver + ?Sized>(
    solver: &S,
    model: &GraphModel,
    variant: Variant,
    with_min_cut: bool,
) -> Result<SolveResult, Error> {
    let formulation = formulate(model, variant)?;
    let solution = solver.solve(&formulation.problem)?;
    let result = report(model, &formulation, &solution, with_min_cut);

    info!(
        %variant,
        status = %result.status,
        objective = ?result.objective(),
        iterations = result.iterations,
        "solved network"
    );

    Ok(result)
}

/// Solve independent models concurrently, one worker per model.
///
/// Results come back in the order of `models`.
pub fn solve_batch(models: &[GraphModel], variant: Variant, options: &SolveOptions) -> Vec<Result<SolveResult, Error>> {
    thread::scope(|scope| {
        let handles: Vec<_> = models
            .iter()
            .map(|model| scope.spawn(move || solve_with(model, variant, options)))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}
