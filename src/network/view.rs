//! Node/edge view of a built network for graph visualization front ends.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::enrich::normalize_direction;
use super::orchestrator::NetworkResult;
use crate::model::{EntityId, LinkType};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Query,
    Bridge,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: EntityId,
    pub label: String,
    pub role: NodeRole,
    pub distance: u8,
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEdge {
    pub source: EntityId,
    pub target: EntityId,
    pub link_type: LinkType,
    pub label: String,
    pub edge_distance: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkView {
    pub nodes: Vec<ViewNode>,
    pub edges: Vec<ViewEdge>,
}

impl NetworkView {
    /// Query entities first (id order), then discovered entities in discovery order.
    /// Edges are reported with the smaller id as source.
    pub fn from_result(result: &NetworkResult) -> Self {
        let mut degree: HashMap<EntityId, usize> = HashMap::new();
        for edge in &result.edges {
            *degree.entry(edge.source).or_default() += 1;
            *degree.entry(edge.target).or_default() += 1;
        }
        let bridges: BTreeSet<EntityId> = result.bridge_nodes.iter().map(|b| b.entity_id).collect();
        let label = |id: EntityId| {
            result
                .entities
                .get(&id)
                .map(|e| e.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("#{}", id))
        };

        let query = result.query_entities.iter().map(|e| ViewNode {
            id: e.id,
            label: label(e.id),
            role: NodeRole::Query,
            distance: 0,
            degree: degree.get(&e.id).copied().unwrap_or(0),
        });
        let discovered = result.discovered_entities.iter().map(|e| ViewNode {
            id: e.id,
            label: label(e.id),
            role: if bridges.contains(&e.id) {
                NodeRole::Bridge
            } else {
                NodeRole::Discovered
            },
            distance: e.min_distance,
            degree: degree.get(&e.id).copied().unwrap_or(0),
        });
        let nodes = query.chain(discovered).collect();

        let edges = normalize_direction(result.edges.clone())
            .into_iter()
            .map(|e| ViewEdge {
                source: e.source,
                target: e.target,
                link_type: e.link_type,
                label: e.label,
                edge_distance: e.edge_distance,
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn node(&self, id: EntityId) -> Option<&ViewNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
