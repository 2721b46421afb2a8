use std::collections::{BTreeMap, VecDeque};

use netflow_solver::{Solution, SolutionStatus};

use crate::formulate::{Formulation, Variant};
use crate::graph::{GraphModel, Role};

/// Values below this magnitude are reported as exact zeros
const ZERO_TOLERANCE: f64 = 1e-9;

/// Outcome of solving a network problem
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolutionStatus,
    pub variant: Variant,
    pub iterations: usize,
    /// Present only when `status` is optimal
    pub optimum: Option<Optimum>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct Optimum {
    /// Maximum flow or minimum cost, depending on the variant
    pub objective: f64,
    /// Every LP variable by name
    pub values: BTreeMap<String, f64>,
    /// One entry per declared arc, in declaration order
    pub flows: Vec<ArcFlow>,
    /// Flow from origins to destinations (max-flow only)
    pub total_flow: Option<f64>,
    /// Minimum cut certifying the max flow, when requested
    pub min_cut: Option<MinCut>,
    /// Names of the node constraints that hold with equality
    pub binding_constraints: Vec<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ArcFlow {
    pub tail: String,
    pub head: String,
    pub flow: f64,
    pub capacity: f64,
    pub cost: f64,
}

/// A set of saturated arcs separating the origin from the destination
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MinCut {
    /// Nodes reachable from an origin in the residual network
    pub source_side: Vec<String>,
    /// Arcs from the source side to the rest, as (tail, head)
    pub arcs: Vec<(String, String)>,
    pub capacity: f64,
}

impl SolveResult {
    pub fn is_optimal(&self) -> bool {
        self.status.is_optimal()
    }

    pub fn objective(&self) -> Option<f64> {
        self.optimum.as_ref().map(|o| o.objective)
    }
}

impl ArcFlow {
    pub fn is_saturated(&self) -> bool {
        saturated(self.flow, self.capacity)
    }
}

/// Flow within round-off of a finite capacity
fn saturated(flow: f64, capacity: f64) -> bool {
    capacity.is_finite() && capacity - flow <= ZERO_TOLERANCE * (1.0 + capacity)
}

impl Optimum {
    pub fn flow(&self, tail: &str, head: &str) -> Option<f64> {
        self.flows
            .iter()
            .find(|f| f.tail == tail && f.head == head)
            .map(|f| f.flow)
    }

    pub fn inflow(&self, node: &str) -> f64 {
        self.flows.iter().filter(|f| f.head == node).map(|f| f.flow).sum()
    }

    pub fn outflow(&self, node: &str) -> f64 {
        self.flows.iter().filter(|f| f.tail == node).map(|f| f.flow).sum()
    }

    /// inflow - outflow at `node`
    pub fn net_inflow(&self, node: &str) -> f64 {
        self.inflow(node) - self.outflow(node)
    }

    /// Sum of cost times flow over all arcs
    pub fn total_cost(&self) -> f64 {
        self.flows.iter().map(|f| f.cost * f.flow).sum()
    }
}

/// Map a solver [`Solution`] back onto the arcs of `model`.
///
/// Non-optimal solutions yield a result without values.
pub fn report(model: &GraphModel, formulation: &Formulation, solution: &Solution, with_min_cut: bool) -> SolveResult {
    let optimum = (solution.status == SolutionStatus::Optimal).then(|| {
        let values: Vec<f64> = solution.values.iter().map(|&v| snap(v)).collect();

        let flows: Vec<ArcFlow> = model
            .arcs()
            .iter()
            .zip(&values)
            .map(|(arc, &flow)| ArcFlow {
                tail: arc.tail.clone(),
                head: arc.head.clone(),
                flow,
                capacity: arc.capacity,
                cost: arc.cost,
            })
            .collect();

        let min_cut = if with_min_cut && formulation.variant == Variant::MaxFlow {
            min_cut(model, &values)
        } else {
            None
        };

        Optimum {
            objective: snap(solution.objective_value),
            values: formulation
                .problem
                .variables
                .iter()
                .zip(&values)
                .map(|(v, &value)| (v.name.clone(), value))
                .collect(),
            flows,
            total_flow: formulation.total_flow.map(|col| values[col]),
            min_cut,
            binding_constraints: solution.analysis.binding_constraints.clone(),
        }
    });

    SolveResult {
        status: solution.status,
        variant: formulation.variant,
        iterations: solution.iterations,
        optimum,
    }
}

/// Cut induced by the nodes reachable from the origin in the residual network of `flows`.
///
/// At an optimal flow every arc leaving the reachable set is saturated, so the cut
/// capacity equals the flow value. Only defined for a single origin and a single
/// destination: with several, every origin row carries the full total flow `y`,
/// and no node partition certifies `y`.
pub fn min_cut(model: &GraphModel, flows: &[f64]) -> Option<MinCut> {
    let mut origins = model.nodes().iter().enumerate().filter(|(_, n)| n.role == Role::Origin);
    let (source, _) = origins.next()?;
    if origins.next().is_some() || model.destinations().count() != 1 {
        return None;
    }

    let mut reachable = vec![false; model.nodes().len()];
    let mut queue = VecDeque::from([source]);
    reachable[source] = true;

    while let Some(u) = queue.pop_front() {
        for &a in model.outgoing(u) {
            let (_, head) = model.endpoints(a);
            if !reachable[head] && !saturated(flows[a], model.arcs()[a].capacity) {
                reachable[head] = true;
                queue.push_back(head);
            }
        }
        for &a in model.incoming(u) {
            let (tail, _) = model.endpoints(a);
            if !reachable[tail] && flows[a] > ZERO_TOLERANCE {
                reachable[tail] = true;
                queue.push_back(tail);
            }
        }
    }

    let mut arcs = Vec::new();
    let mut capacity = 0.0;
    for (a, arc) in model.arcs().iter().enumerate() {
        let (tail, head) = model.endpoints(a);
        if reachable[tail] && !reachable[head] {
            arcs.push((arc.tail.clone(), arc.head.clone()));
            capacity += arc.capacity;
        }
    }

    Some(MinCut {
        source_side: model
            .nodes()
            .iter()
            .zip(&reachable)
            .filter(|(_, r)| **r)
            .map(|(n, _)| n.id.clone())
            .collect(),
        arcs,
        capacity,
    })
}

fn snap(value: f64) -> f64 {
    if value.abs() < ZERO_TOLERANCE { 0.0 } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulate::formulate;
    use crate::graph::Arc;
    use netflow_solver::Solver;

    fn diamond() -> GraphModel {
        GraphModel::builder()
            .origin("A")
            .transshipment("B")
            .transshipment("C")
            .destination("D")
            .arc(Arc::new("A", "B", 10.0))
            .arc(Arc::new("A", "C", 5.0))
            .arc(Arc::new("B", "D", 7.0))
            .arc(Arc::new("C", "D", 8.0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_min_cut_from_hand_flow() {
        let model = diamond();
        let cut = min_cut(&model, &[7.0, 5.0, 7.0, 5.0]).unwrap();

        assert_eq!(cut.source_side, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            cut.arcs,
            vec![("A".to_string(), "C".to_string()), ("B".to_string(), "D".to_string())]
        );
        assert_eq!(cut.capacity, 12.0);
    }

    #[test]
    fn test_report_optimal_max_flow() {
        let model = diamond();
        let formulation = formulate(&model, Variant::MaxFlow).unwrap();
        let solution = Solver::new().solve(&formulation.problem).unwrap();

        let result = report(&model, &formulation, &solution, true);
        let optimum = result.optimum.as_ref().unwrap();

        assert!(result.is_optimal());
        assert_eq!(optimum.flows.len(), 4);
        assert_eq!(optimum.values.len(), 5);
        assert!((optimum.total_flow.unwrap() - 12.0).abs() < 1e-9);
        assert!((optimum.values["y"] - 12.0).abs() < 1e-9);
        assert!((optimum.flow("B", "D").unwrap() - 7.0).abs() < 1e-9);
        assert!((optimum.min_cut.as_ref().unwrap().capacity - 12.0).abs() < 1e-9);
        assert!(optimum.flows.iter().find(|f| f.tail == "B").unwrap().is_saturated());
    }

    #[test]
    fn test_report_without_min_cut() {
        let model = diamond();
        let formulation = formulate(&model, Variant::MaxFlow).unwrap();
        let solution = Solver::new().solve(&formulation.problem).unwrap();

        let result = report(&model, &formulation, &solution, false);
        assert!(result.optimum.unwrap().min_cut.is_none());
    }

    #[test]
    fn test_report_non_optimal_has_no_values() {
        let model = diamond();
        let formulation = formulate(&model, Variant::MaxFlow).unwrap();
        let solution = Solution::infeasible(3);

        let result = report(&model, &formulation, &solution, true);
        assert_eq!(result.status, SolutionStatus::Infeasible);
        assert_eq!(result.iterations, 3);
        assert!(result.optimum.is_none());
        assert_eq!(result.objective(), None);
    }

    #[test]
    fn test_min_cut_respects_relative_saturation() {
        let capacity = 1e12;
        let model = GraphModel::builder()
            .origin("A")
            .destination("D")
            .arc(Arc::new("A", "D", capacity))
            .build()
            .unwrap();
        let flow = capacity - 1e-3;

        let cut = min_cut(&model, &[flow]).unwrap();
        assert_eq!(cut.source_side, vec!["A".to_string()]);
        assert_eq!(cut.arcs, vec![("A".to_string(), "D".to_string())]);

        let arc = ArcFlow {
            tail: "A".to_string(),
            head: "D".to_string(),
            flow,
            capacity,
            cost: 0.0,
        };
        assert!(arc.is_saturated());
    }

    #[test]
    fn test_no_min_cut_with_several_origins() {
        let model = GraphModel::builder()
            .origin("A1")
            .origin("A2")
            .destination("D1")
            .destination("D2")
            .arc(Arc::new("A1", "D1", 5.0))
            .arc(Arc::new("A2", "D2", 3.0))
            .arc(Arc::new("A1", "D2", 10.0))
            .build()
            .unwrap();
        let formulation = formulate(&model, Variant::MaxFlow).unwrap();
        let solution = Solver::new().solve(&formulation.problem).unwrap();

        let result = report(&model, &formulation, &solution, true);
        let optimum = result.optimum.as_ref().unwrap();

        assert!((optimum.objective - 3.0).abs() < 1e-9);
        assert!(optimum.min_cut.is_none());
        assert!(min_cut(&model, &[3.0, 3.0, 0.0]).is_none());
    }

    #[test]
    fn test_no_min_cut_with_several_destinations() {
        let model = GraphModel::builder()
            .origin("A")
            .destination("D1")
            .destination("D2")
            .arc(Arc::new("A", "D1", 4.0))
            .arc(Arc::new("A", "D2", 4.0))
            .build()
            .unwrap();

        assert!(min_cut(&model, &[2.0, 2.0]).is_none());
    }
}
