use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Arc, GraphModel, Node, Role, ValidationError};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Malformed network data: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Network description as stored on disk.
///
/// Nodes are listed once in `nodes` and assigned a role by membership in exactly
/// one of `origins`, `transshipment` or `destinations`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkData {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub transshipment: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub arcs: Vec<ArcData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supply: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub demand: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcData {
    pub tail: String,
    pub head: String,
    /// Omitted means uncapacitated
    #[serde(default, alias = "limit", skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub cost: f64,
}

impl NetworkData {
    pub fn from_json(source: &str) -> Result<Self, DataError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Parse and validate in one step
    pub fn parse_model(source: &str) -> Result<GraphModel, DataError> {
        Ok(Self::from_json(source)?.into_model()?)
    }

    pub fn into_model(self) -> Result<GraphModel, ValidationError> {
        let roles = self.role_map()?;

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for id in self.nodes {
            let role = roles
                .get(&id)
                .copied()
                .ok_or_else(|| ValidationError::MissingRole(id.clone()))?;
            let mut node = Node::new(id, role);
            node.supply = self.supply.get(&node.id).copied();
            node.demand = self.demand.get(&node.id).copied();
            nodes.push(node);
        }

        // Amounts for undeclared nodes would otherwise be dropped silently
        let amounts = [("supply", &self.supply), ("demand", &self.demand)];
        for (kind, map) in amounts {
            if let Some(id) = map.keys().find(|id| !roles.contains_key(*id)) {
                return Err(ValidationError::UnknownAmountNode { node: id.clone(), kind });
            }
        }

        let arcs = self
            .arcs
            .into_iter()
            .map(|a| Arc::new(a.tail, a.head, a.capacity.unwrap_or(f64::INFINITY)).with_cost(a.cost))
            .collect();

        GraphModel::build(nodes, arcs)
    }

    /// Role of every listed node, checking that the role sets partition `nodes`
    fn role_map(&self) -> Result<BTreeMap<String, Role>, ValidationError> {
        let declared: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();

        let mut roles = BTreeMap::new();
        let sets = [
            (Role::Origin, &self.origins),
            (Role::Transshipment, &self.transshipment),
            (Role::Destination, &self.destinations),
        ];
        for (role, ids) in sets {
            for id in ids {
                if !declared.contains(id.as_str()) {
                    return Err(ValidationError::UnknownRoleNode(id.clone()));
                }
                if roles.insert(id.clone(), role).is_some() {
                    return Err(ValidationError::RoleConflict(id.clone()));
                }
            }
        }

        Ok(roles)
    }
}

impl From<&GraphModel> for NetworkData {
    fn from(model: &GraphModel) -> Self {
        let ids = |role: Role| -> Vec<String> { model.with_role(role).map(|n| n.id.clone()).collect() };
        Self {
            nodes: model.nodes().iter().map(|n| n.id.clone()).collect(),
            origins: ids(Role::Origin),
            transshipment: ids(Role::Transshipment),
            destinations: ids(Role::Destination),
            arcs: model
                .arcs()
                .iter()
                .map(|a| ArcData {
                    tail: a.tail.clone(),
                    head: a.head.clone(),
                    capacity: a.capacity.is_finite().then_some(a.capacity),
                    cost: a.cost,
                })
                .collect(),
            supply: model
                .nodes()
                .iter()
                .filter_map(|n| n.supply.map(|s| (n.id.clone(), s)))
                .collect(),
            demand: model
                .nodes()
                .iter()
                .filter_map(|n| n.demand.map(|d| (n.id.clone(), d)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: &str = r#"{
        "nodes": ["A", "B", "C", "D"],
        "origins": ["A"],
        "transshipment": ["B", "C"],
        "destinations": ["D"],
        "arcs": [
            {"tail": "A", "head": "B", "capacity": 10},
            {"tail": "A", "head": "C", "capacity": 5},
            {"tail": "B", "head": "D", "capacity": 7},
            {"tail": "C", "head": "D", "capacity": 8}
        ]
    }"#;

    #[test]
    fn test_load_diamond() {
        let model = NetworkData::parse_model(DIAMOND).unwrap();

        assert_eq!(model.nodes().len(), 4);
        assert_eq!(model.arcs().len(), 4);
        assert_eq!(model.node("C").unwrap().role, Role::Transshipment);
        assert_eq!(model.arcs()[3].capacity, 8.0);
        assert_eq!(model.arcs()[3].cost, 0.0);
    }

    #[test]
    fn test_load_min_cost_with_limit_alias() {
        let source = r#"{
            "nodes": ["S", "T"],
            "origins": ["S"],
            "destinations": ["T"],
            "arcs": [{"tail": "S", "head": "T", "limit": 10, "cost": 3}],
            "supply": {"S": 10},
            "demand": {"T": 10}
        }"#;
        let model = NetworkData::parse_model(source).unwrap();

        assert_eq!(model.arcs()[0], Arc::new("S", "T", 10.0).with_cost(3.0));
        assert_eq!(model.node("S").unwrap().supply, Some(10.0));
        assert_eq!(model.total_demand(), 10.0);
    }

    #[test]
    fn test_missing_capacity_is_unbounded() {
        let source = r#"{
            "nodes": ["A", "D"],
            "origins": ["A"],
            "destinations": ["D"],
            "arcs": [{"tail": "A", "head": "D"}]
        }"#;
        let model = NetworkData::parse_model(source).unwrap();
        assert_eq!(model.arcs()[0].capacity, f64::INFINITY);
    }

    #[test]
    fn test_role_partition_errors() {
        let mut data = NetworkData::from_json(DIAMOND).unwrap();
        data.destinations.push("B".to_string());
        assert_eq!(
            data.into_model().unwrap_err(),
            ValidationError::RoleConflict("B".to_string())
        );

        let mut data = NetworkData::from_json(DIAMOND).unwrap();
        data.transshipment.retain(|id| id != "C");
        assert_eq!(data.into_model().unwrap_err(), ValidationError::MissingRole("C".to_string()));

        let mut data = NetworkData::from_json(DIAMOND).unwrap();
        data.origins.push("Z".to_string());
        assert_eq!(
            data.into_model().unwrap_err(),
            ValidationError::UnknownRoleNode("Z".to_string())
        );
    }

    #[test]
    fn test_amount_for_undeclared_node() {
        let mut data = NetworkData::from_json(DIAMOND).unwrap();
        data.supply.insert("Q".to_string(), 1.0);
        assert_eq!(
            data.into_model().unwrap_err(),
            ValidationError::UnknownAmountNode {
                node: "Q".to_string(),
                kind: "supply",
            }
        );

        let mut data = NetworkData::from_json(DIAMOND).unwrap();
        data.demand.insert("R".to_string(), 2.0);
        let err = data.into_model().unwrap_err();
        assert_eq!(err.to_string(), "demand given for unknown node R");
    }

    #[test]
    fn test_malformed_json() {
        let err = NetworkData::parse_model("{\"nodes\": [").unwrap_err();
        assert!(matches!(err, DataError::Json(_)));

        let err = NetworkData::parse_model(r#"{"nodes": ["A"], "origins": ["A"]}"#).unwrap_err();
        assert!(matches!(err, DataError::Invalid(ValidationError::MissingDestination)));
    }

    #[test]
    fn test_model_to_data_and_back() {
        let model = NetworkData::parse_model(DIAMOND).unwrap();
        let data = NetworkData::from(&model);
        let json = serde_json::to_string(&data).unwrap();
        let reloaded = NetworkData::parse_model(&json).unwrap();

        assert_eq!(reloaded.nodes(), model.nodes());
        assert_eq!(reloaded.arcs(), model.arcs());
    }
}
