use std::fmt;

use netflow_solver::{Constraint, ConstraintOp, LpProblem, Objective, Variable};
use tracing::debug;

use crate::graph::{Arc, GraphModel, Node, Role, ValidationError};

/// Name of the total-flow variable in max-flow formulations
pub const TOTAL_FLOW: &str = "y";

/// Which network problem to formulate
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Maximize the flow pushed from origins to destinations
    MaxFlow,
    /// Minimize the cost of meeting every demand from the available supply
    MinCost,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::MaxFlow => "max-flow",
            Variant::MinCost => "min-cost",
        })
    }
}

/// An LP built from a [`GraphModel`], ready for solving.
///
/// Column `i` of the problem is the flow on arc `i` of the model; max-flow
/// formulations append the total-flow column after the arcs.
#[derive(Debug, Clone)]
pub struct Formulation {
    pub variant: Variant,
    pub problem: LpProblem,
    /// Column of the total-flow variable (max-flow only)
    pub total_flow: Option<usize>,
}

/// Formulate `model` as an LP for the given variant
pub fn formulate(model: &GraphModel, variant: Variant) -> Result<Formulation, ValidationError> {
    let constraints = build_constraints(model, variant)?;
    let mut problem = LpProblem::new(build_variables(model, variant));
    problem.objective = build_objective(model, variant);
    problem.constraints = constraints;

    let total_flow = match variant {
        Variant::MaxFlow => Some(model.arcs().len()),
        Variant::MinCost => None,
    };

    debug!(
        %variant,
        variables = problem.num_variables(),
        constraints = problem.num_constraints(),
        "formulated network LP"
    );

    Ok(Formulation {
        variant,
        problem,
        total_flow,
    })
}

pub fn arc_variable_name(arc: &Arc) -> String {
    format!("x[{},{}]", arc.tail, arc.head)
}

/// One variable per declared arc, bounded by its capacity; max-flow adds `y >= 0`
pub fn build_variables(model: &GraphModel, variant: Variant) -> Vec<Variable> {
    let mut variables: Vec<Variable> = model
        .arcs()
        .iter()
        .map(|arc| Variable::bounded(arc_variable_name(arc), 0.0, arc.capacity))
        .collect();

    if variant == Variant::MaxFlow {
        variables.push(Variable::new(TOTAL_FLOW));
    }

    variables
}

pub fn build_objective(model: &GraphModel, variant: Variant) -> Objective {
    let n_arcs = model.arcs().len();
    match variant {
        Variant::MaxFlow => {
            let mut coefficients = vec![0.0; n_arcs + 1];
            coefficients[n_arcs] = 1.0;
            Objective {
                coefficients,
                minimize: false,
            }
        }
        Variant::MinCost => Objective {
            coefficients: model.arcs().iter().map(|arc| arc.cost).collect(),
            minimize: true,
        },
    }
}

/// One constraint per node, shaped by the node's role and the variant
pub fn build_constraints(model: &GraphModel, variant: Variant) -> Result<Vec<Constraint>, ValidationError> {
    let n_vars = match variant {
        Variant::MaxFlow => model.arcs().len() + 1,
        Variant::MinCost => model.arcs().len(),
    };

    let mut constraints = Vec::with_capacity(model.nodes().len());
    for (i, node) in model.nodes().iter().enumerate() {
        let constraint = match variant {
            Variant::MaxFlow => max_flow_constraint(model, i, node, n_vars),
            Variant::MinCost => min_cost_constraint(model, i, node, n_vars)?,
        };
        constraints.push(constraint);
    }

    Ok(constraints)
}

/// inflow - outflow over the declared arcs at node `i`
fn balance(model: &GraphModel, i: usize, n_vars: usize) -> Vec<f64> {
    let mut coefficients = vec![0.0; n_vars];
    for &a in model.incoming(i) {
        coefficients[a] += 1.0;
    }
    for &a in model.outgoing(i) {
        coefficients[a] -= 1.0;
    }
    coefficients
}

fn max_flow_constraint(model: &GraphModel, i: usize, node: &Node, n_vars: usize) -> Constraint {
    let mut coefficients = balance(model, i, n_vars);
    let y = n_vars - 1;
    match node.role {
        Role::Origin => coefficients[y] = 1.0,
        Role::Transshipment => {}
        Role::Destination => coefficients[y] = -1.0,
    }

    Constraint {
        name: format!("{}[{}]", node.role, node.id),
        coefficients,
        op: ConstraintOp::Eq,
        rhs: 0.0,
    }
}

fn min_cost_constraint(model: &GraphModel, i: usize, node: &Node, n_vars: usize) -> Result<Constraint, ValidationError> {
    let isolated = model.incoming(i).is_empty() && model.outgoing(i).is_empty();

    let constraint = match node.role {
        Role::Origin => {
            let supply = node.supply.unwrap_or(0.0);
            if isolated && supply > 0.0 {
                return Err(ValidationError::IsolatedNode {
                    node: node.id.clone(),
                    kind: "supply",
                    amount: supply,
                });
            }
            let mut coefficients = vec![0.0; n_vars];
            for &a in model.outgoing(i) {
                coefficients[a] += 1.0;
            }
            Constraint {
                name: format!("supply[{}]", node.id),
                coefficients,
                op: ConstraintOp::Le,
                rhs: supply,
            }
        }
        Role::Transshipment => Constraint {
            name: format!("balance[{}]", node.id),
            coefficients: balance(model, i, n_vars),
            op: ConstraintOp::Eq,
            rhs: 0.0,
        },
        Role::Destination => {
            let demand = node.demand.unwrap_or(0.0);
            if isolated && demand > 0.0 {
                return Err(ValidationError::IsolatedNode {
                    node: node.id.clone(),
                    kind: "demand",
                    amount: demand,
                });
            }
            let mut coefficients = vec![0.0; n_vars];
            for &a in model.incoming(i) {
                coefficients[a] += 1.0;
            }
            Constraint {
                name: format!("demand[{}]", node.id),
                coefficients,
                op: ConstraintOp::Ge,
                rhs: demand,
            }
        }
    };

    Ok(constraint)
}
