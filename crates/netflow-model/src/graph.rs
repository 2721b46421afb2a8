use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
    #[error("Node {0} is assigned to more than one role")]
    RoleConflict(String),
    #[error("Node {0} has no role")]
    MissingRole(String),
    #[error("Role set mentions unknown node: {0}")]
    UnknownRoleNode(String),
    #[error("Arc {arc} references unknown node {node}")]
    UnknownNode { arc: String, node: String },
    #[error("Duplicate arc: {0}")]
    DuplicateArc(String),
    #[error("Arc {arc} has negative or undefined capacity {capacity}")]
    InvalidCapacity { arc: String, capacity: f64 },
    #[error("Arc {arc} has non-finite cost {cost}")]
    InvalidCost { arc: String, cost: f64 },
    #[error("Model has no origin node")]
    MissingOrigin,
    #[error("Model has no destination node")]
    MissingDestination,
    #[error("Node {node} has negative or non-finite {kind} {amount}")]
    InvalidAmount { node: String, kind: &'static str, amount: f64 },
    #[error("Supply given for non-origin node {0}")]
    SupplyOnNonOrigin(String),
    #[error("Demand given for non-destination node {0}")]
    DemandOnNonDestination(String),
    #[error("{kind} given for unknown node {node}")]
    UnknownAmountNode { node: String, kind: &'static str },
    #[error("Node {node} has {kind} {amount} but no declared arcs")]
    IsolatedNode { node: String, kind: &'static str, amount: f64 },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Origin,
    Transshipment,
    Destination,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub role: Role,
    /// Items available at an origin (min-cost only)
    pub supply: Option<f64>,
    /// Items required at a destination (min-cost only)
    pub demand: Option<f64>,
}

/// A directed arc. `capacity` is the capacity for max-flow and the flow limit for min-cost.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    pub tail: String,
    pub head: String,
    pub capacity: f64,
    pub cost: f64,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Origin => "origin",
            Role::Transshipment => "transshipment",
            Role::Destination => "destination",
        })
    }
}

impl Node {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            supply: None,
            demand: None,
        }
    }

    pub fn origin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Origin)
    }

    pub fn transshipment(id: impl Into<String>) -> Self {
        Self::new(id, Role::Transshipment)
    }

    pub fn destination(id: impl Into<String>) -> Self {
        Self::new(id, Role::Destination)
    }

    pub fn with_supply(mut self, supply: f64) -> Self {
        self.supply = Some(supply);
        self
    }

    pub fn with_demand(mut self, demand: f64) -> Self {
        self.demand = Some(demand);
        self
    }
}

impl Arc {
    pub fn new(tail: impl Into<String>, head: impl Into<String>, capacity: f64) -> Self {
        Self {
            tail: tail.into(),
            head: head.into(),
            capacity,
            cost: 0.0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn label(&self) -> String {
        format!("{}->{}", self.tail, self.head)
    }
}

/// A validated network: nodes partitioned into roles, and the declared arcs between them.
///
/// Only obtainable through [`GraphModel::build`] or [`GraphModelBuilder`], so every
/// value upholds the invariants checked there.
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: Vec<Node>,
    arcs: Vec<Arc>,
    index: HashMap<String, usize>,
    /// (tail, head) node indices per arc
    ends: Vec<(usize, usize)>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
}

impl GraphModel {
    pub fn builder() -> GraphModelBuilder {
        GraphModelBuilder::default()
    }

    /// Validate `nodes` and `arcs` and assemble them into a model
    pub fn build(nodes: Vec<Node>, arcs: Vec<Arc>) -> Result<Self, ValidationError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
            validate_amounts(node)?;
        }

        if !nodes.iter().any(|n| n.role == Role::Origin) {
            return Err(ValidationError::MissingOrigin);
        }
        if !nodes.iter().any(|n| n.role == Role::Destination) {
            return Err(ValidationError::MissingDestination);
        }

        let mut incoming = vec![Vec::new(); nodes.len()];
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut ends = Vec::with_capacity(arcs.len());
        let mut seen = HashSet::with_capacity(arcs.len());
        for (a, arc) in arcs.iter().enumerate() {
            let endpoint = |id: &String| {
                index.get(id).copied().ok_or_else(|| ValidationError::UnknownNode {
                    arc: arc.label(),
                    node: id.clone(),
                })
            };
            let tail = endpoint(&arc.tail)?;
            let head = endpoint(&arc.head)?;

            if !seen.insert((tail, head)) {
                return Err(ValidationError::DuplicateArc(arc.label()));
            }
            if arc.capacity.is_nan() || arc.capacity < 0.0 {
                return Err(ValidationError::InvalidCapacity {
                    arc: arc.label(),
                    capacity: arc.capacity,
                });
            }
            if !arc.cost.is_finite() {
                return Err(ValidationError::InvalidCost {
                    arc: arc.label(),
                    cost: arc.cost,
                });
            }

            ends.push((tail, head));
            outgoing[tail].push(a);
            incoming[head].push(a);
        }

        Ok(Self {
            nodes,
            arcs,
            index,
            ends,
            incoming,
            outgoing,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn arc_index(&self, tail: &str, head: &str) -> Option<usize> {
        let tail = self.node_index(tail)?;
        let head = self.node_index(head)?;
        self.outgoing[tail].iter().copied().find(|&a| self.ends[a].1 == head)
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn origins(&self) -> impl Iterator<Item = &Node> {
        self.with_role(Role::Origin)
    }

    pub fn transshipments(&self) -> impl Iterator<Item = &Node> {
        self.with_role(Role::Transshipment)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Node> {
        self.with_role(Role::Destination)
    }

    /// Node indices of the tail and head of arc `arc`
    pub fn endpoints(&self, arc: usize) -> (usize, usize) {
        self.ends[arc]
    }

    /// Indices of the arcs ending at node `node` (by node index)
    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    /// Indices of the arcs leaving node `node` (by node index)
    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn total_supply(&self) -> f64 {
        self.origins().filter_map(|n| n.supply).sum()
    }

    pub fn total_demand(&self) -> f64 {
        self.destinations().filter_map(|n| n.demand).sum()
    }
}

fn validate_amounts(node: &Node) -> Result<(), ValidationError> {
    for (kind, amount) in [("supply", node.supply), ("demand", node.demand)] {
        let Some(amount) = amount else { continue };
        if !amount.is_finite() || amount < 0.0 {
            return Err(ValidationError::InvalidAmount {
                node: node.id.clone(),
                kind,
                amount,
            });
        }
    }
    if node.supply.is_some() && node.role != Role::Origin {
        return Err(ValidationError::SupplyOnNonOrigin(node.id.clone()));
    }
    if node.demand.is_some() && node.role != Role::Destination {
        return Err(ValidationError::DemandOnNonDestination(node.id.clone()));
    }
    Ok(())
}

/// Fluent construction of a [`GraphModel`]; validation happens in [`GraphModelBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct GraphModelBuilder {
    nodes: Vec<Node>,
    arcs: Vec<Arc>,
}

impl GraphModelBuilder {
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn origin(self, id: impl Into<String>) -> Self {
        self.node(Node::origin(id))
    }

    pub fn transshipment(self, id: impl Into<String>) -> Self {
        self.node(Node::transshipment(id))
    }

    pub fn destination(self, id: impl Into<String>) -> Self {
        self.node(Node::destination(id))
    }

    pub fn arc(mut self, arc: Arc) -> Self {
        self.arcs.push(arc);
        self
    }

    pub fn build(self) -> Result<GraphModel, ValidationError> {
        GraphModel::build(self.nodes, self.arcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> GraphModelBuilder {
        GraphModel::builder()
            .origin("A")
            .transshipment("B")
            .transshipment("C")
            .destination("D")
            .arc(Arc::new("A", "B", 10.0))
            .arc(Arc::new("A", "C", 5.0))
            .arc(Arc::new("B", "D", 7.0))
            .arc(Arc::new("C", "D", 8.0))
    }

    #[test]
    fn test_build_valid_model() {
        let model = diamond().build().unwrap();

        assert_eq!(model.nodes().len(), 4);
        assert_eq!(model.arcs().len(), 4);
        assert_eq!(model.origins().count(), 1);
        assert_eq!(model.transshipments().count(), 2);
        assert_eq!(model.destinations().count(), 1);

        let a = model.node_index("A").unwrap();
        let d = model.node_index("D").unwrap();
        assert_eq!(model.outgoing(a).len(), 2);
        assert!(model.incoming(a).is_empty());
        assert_eq!(model.incoming(d).len(), 2);
        assert_eq!(model.arc_index("B", "D"), Some(2));
        assert_eq!(model.arc_index("D", "B"), None);
        assert_eq!(model.endpoints(2), (model.node_index("B").unwrap(), d));
    }

    #[test]
    fn test_unknown_endpoint() {
        let err = diamond().arc(Arc::new("C", "E", 1.0)).build().unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownNode {
                arc: "C->E".to_string(),
                node: "E".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_arc() {
        let err = diamond().arc(Arc::new("A", "B", 3.0)).build().unwrap_err();
        assert_eq!(err, ValidationError::DuplicateArc("A->B".to_string()));
    }

    #[test]
    fn test_duplicate_node() {
        let err = diamond().destination("B").build().unwrap_err();
        assert_eq!(err, ValidationError::DuplicateNode("B".to_string()));
    }

    #[test]
    fn test_negative_capacity() {
        let err = diamond().arc(Arc::new("B", "C", -1.0)).build().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCapacity { .. }));
    }

    #[test]
    fn test_infinite_capacity_is_allowed() {
        let model = diamond().arc(Arc::new("B", "C", f64::INFINITY)).build().unwrap();
        assert_eq!(model.arcs().len(), 5);
    }

    #[test]
    fn test_non_finite_cost() {
        let err = diamond()
            .arc(Arc::new("B", "C", 1.0).with_cost(f64::NAN))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCost { .. }));
    }

    #[test]
    fn test_missing_roles() {
        let err = GraphModel::builder().transshipment("B").destination("D").build().unwrap_err();
        assert_eq!(err, ValidationError::MissingOrigin);

        let err = GraphModel::builder().origin("A").build().unwrap_err();
        assert_eq!(err, ValidationError::MissingDestination);
    }

    #[test]
    fn test_supply_and_demand_placement() {
        let err = GraphModel::builder()
            .node(Node::origin("A"))
            .node(Node::destination("D").with_supply(4.0))
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::SupplyOnNonOrigin("D".to_string()));

        let err = GraphModel::builder()
            .node(Node::origin("A").with_demand(4.0))
            .destination("D")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::DemandOnNonDestination("A".to_string()));

        let err = GraphModel::builder()
            .node(Node::origin("A").with_supply(-2.0))
            .destination("D")
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAmount { kind: "supply", .. }));
    }

    #[test]
    fn test_totals() {
        let model = GraphModel::builder()
            .node(Node::origin("A").with_supply(10.0))
            .node(Node::origin("B").with_supply(5.0))
            .node(Node::destination("D").with_demand(12.0))
            .arc(Arc::new("A", "D", 10.0))
            .arc(Arc::new("B", "D", 10.0))
            .build()
            .unwrap();

        assert_eq!(model.total_supply(), 15.0);
        assert_eq!(model.total_demand(), 12.0);
    }

    #[test]
    fn test_self_loop_is_allowed() {
        let model = diamond().arc(Arc::new("B", "B", 2.0)).build().unwrap();
        let b = model.node_index("B").unwrap();
        assert_eq!(model.incoming(b).len(), 2);
        assert_eq!(model.outgoing(b).len(), 2);
    }
}
