mod problem;
mod simplex;
mod solution;

pub use problem::{Constraint, ConstraintOp, LpProblem, Objective, ProblemError, Variable};
pub use simplex::{LpSolver, Solver};
pub use solution::{Analysis, ReducedCost, ShadowPrice, Solution, SolutionStatus};
