use netflow_solver::ProblemError;
use thiserror::Error;

use crate::graph::ValidationError;

/// Failure to get a [`SolveResult`](crate::SolveResult) out of a model.
///
/// Infeasible or unbounded networks are not errors; they come back as a status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid model: {0}")]
    Validation(#[from] ValidationError),
    #[error("Invalid LP: {0}")]
    Problem(#[from] ProblemError),
}
