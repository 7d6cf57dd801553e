//! Summary statistics over an assembled network.

use petgraph::algo::connected_components;
use petgraph::graphmap::UnGraphMap;
use serde::{Deserialize, Serialize};

use crate::model::{EntityId, LinkType, NetworkEdge};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub kinship_edges: usize,
    pub association_edges: usize,
    /// 2E / N(N-1); 0.0 for fewer than two nodes.
    pub density: f64,
    pub average_degree: f64,
    pub connected_components: usize,
    /// Highest-degree entity, lowest id on ties.
    pub max_degree_entity: Option<EntityId>,
    pub max_degree: usize,
}

/// Compute metrics over `nodes` and the edges among them. Edge endpoints not in
/// `nodes` are added as nodes.
pub fn compute_metrics(nodes: &[EntityId], edges: &[NetworkEdge]) -> NetworkMetrics {
    let mut graph: UnGraphMap<EntityId, ()> = UnGraphMap::with_capacity(nodes.len(), edges.len());
    for id in nodes {
        graph.add_node(*id);
    }
    let mut kinship_edges = 0;
    let mut association_edges = 0;
    for edge in edges {
        graph.add_edge(edge.source, edge.target, ());
        match edge.link_type {
            LinkType::Kinship => kinship_edges += 1,
            LinkType::Association => association_edges += 1,
        }
    }

    let n = graph.node_count();
    let e = graph.edge_count();
    let density = if n < 2 {
        0.0
    } else {
        (2 * e) as f64 / (n * (n - 1)) as f64
    };
    let average_degree = if n == 0 { 0.0 } else { (2 * e) as f64 / n as f64 };

    let mut max_degree = 0;
    let mut max_degree_entity = None;
    let mut ids: Vec<EntityId> = graph.nodes().collect();
    ids.sort_unstable();
    for id in ids {
        let degree = graph.neighbors(id).count();
        if max_degree_entity.is_none() || degree > max_degree {
            max_degree = degree;
            max_degree_entity = Some(id);
        }
    }

    NetworkMetrics {
        node_count: n,
        edge_count: e,
        kinship_edges,
        association_edges,
        density,
        average_degree,
        connected_components: connected_components(&graph),
        max_degree_entity,
        max_degree,
    }
}
