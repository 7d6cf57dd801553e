//! Immutable graph handles and the petgraph-backed algorithm provider.
//!
//! A `GraphHandle` is built once from a node and edge set and then only read,
//! so the cache can hand out `Arc` clones to concurrent readers.

mod metrics;

pub use metrics::{compute_metrics, NetworkMetrics};

use async_trait::async_trait;
use petgraph::algo::{all_simple_paths, astar};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::model::{EntityId, NetworkEdge};
use crate::provider::GraphAlgorithmProvider;
use crate::Result;

/// A path through a graph handle: entity ids plus indices into `GraphHandle::edges`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPath {
    pub nodes: Vec<EntityId>,
    pub edges: Vec<usize>,
}

/// Assembled graph over entity ids.
///
/// Undirected graphs are stored as a digraph with both arc directions, each arc
/// carrying the index of its originating `NetworkEdge`.
#[derive(Debug)]
pub struct GraphHandle {
    graph: DiGraph<EntityId, usize>,
    index: HashMap<EntityId, NodeIndex>,
    edges: Vec<NetworkEdge>,
    directed: bool,
}

impl GraphHandle {
    pub fn build(nodes: &[EntityId], edges: Vec<NetworkEdge>, directed: bool) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len() * 2);
        let mut index = HashMap::with_capacity(nodes.len());

        for id in nodes {
            index.entry(*id).or_insert_with(|| graph.add_node(*id));
        }
        for (i, edge) in edges.iter().enumerate() {
            let a = *index
                .entry(edge.source)
                .or_insert_with(|| graph.add_node(edge.source));
            let b = *index
                .entry(edge.target)
                .or_insert_with(|| graph.add_node(edge.target));
            if graph.find_edge(a, b).is_none() {
                graph.add_edge(a, b, i);
            }
            if !directed && graph.find_edge(b, a).is_none() {
                graph.add_edge(b, a, i);
            }
        }

        Self {
            graph,
            index,
            edges,
            directed,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn edges(&self) -> &[NetworkEdge] {
        &self.edges
    }

    pub fn edge(&self, i: usize) -> Option<&NetworkEdge> {
        self.edges.get(i)
    }

    /// Map a node-index walk onto entity ids and edge indices.
    fn to_path(&self, walk: &[NodeIndex]) -> Option<GraphPath> {
        let mut edges = Vec::with_capacity(walk.len().saturating_sub(1));
        for pair in walk.windows(2) {
            let e = self.graph.find_edge(pair[0], pair[1])?;
            edges.push(*self.graph.edge_weight(e)?);
        }
        Some(GraphPath {
            nodes: walk.iter().map(|n| self.graph[*n]).collect(),
            edges,
        })
    }
}

/// `GraphAlgorithmProvider` over petgraph.
#[derive(Debug, Clone, Copy, Default)]
pub struct PetgraphAlgorithms;

impl PetgraphAlgorithms {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphAlgorithmProvider for PetgraphAlgorithms {
    async fn build_graph_handle(
        &self,
        nodes: Vec<EntityId>,
        edges: Vec<NetworkEdge>,
        directed: bool,
    ) -> Result<GraphHandle> {
        Ok(GraphHandle::build(&nodes, edges, directed))
    }

    async fn shortest_path(
        &self,
        handle: &GraphHandle,
        source: EntityId,
        target: EntityId,
    ) -> Result<Option<GraphPath>> {
        let (Some(&from), Some(&to)) = (handle.index.get(&source), handle.index.get(&target)) else {
            return Ok(None);
        };
        // Unit weights and a zero heuristic: breadth-first shortest path.
        let found = astar(&handle.graph, from, |n| n == to, |_| 1usize, |_| 0);
        Ok(found.and_then(|(_, walk)| handle.to_path(&walk)))
    }

    async fn all_simple_paths(
        &self,
        handle: &GraphHandle,
        source: EntityId,
        target: EntityId,
        max_length: usize,
    ) -> Result<Vec<GraphPath>> {
        let (Some(&from), Some(&to)) = (handle.index.get(&source), handle.index.get(&target)) else {
            return Ok(Vec::new());
        };
        if max_length == 0 || from == to {
            return Ok(Vec::new());
        }
        let walks = all_simple_paths::<Vec<NodeIndex>, _>(
            &handle.graph,
            from,
            to,
            0,
            Some(max_length - 1),
        );
        Ok(walks.filter_map(|walk| handle.to_path(&walk)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkType, TypedLink};

    fn edge(a: EntityId, b: EntityId) -> NetworkEdge {
        NetworkEdge::from_link(TypedLink::new(LinkType::Kinship, a, b, 1), 2, 1)
    }

    // 1 - 2 - 3 - 4, plus shortcut 1 - 3
    fn diamond() -> GraphHandle {
        GraphHandle::build(
            &[1, 2, 3, 4, 5],
            vec![edge(1, 2), edge(2, 3), edge(3, 4), edge(1, 3)],
            false,
        )
    }

    #[tokio::test]
    async fn test_shortest_path_undirected() {
        let handle = diamond();
        let path = PetgraphAlgorithms
            .shortest_path(&handle, 4, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.nodes, vec![4, 3, 1]);
        assert_eq!(path.edges, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_shortest_path_unreachable_and_unknown() {
        let handle = diamond();
        assert!(PetgraphAlgorithms.shortest_path(&handle, 1, 5).await.unwrap().is_none());
        assert!(PetgraphAlgorithms.shortest_path(&handle, 1, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directed_graph_respects_direction() {
        let handle = GraphHandle::build(&[1, 2], vec![edge(1, 2)], true);
        assert!(handle.is_directed());
        assert!(PetgraphAlgorithms.shortest_path(&handle, 1, 2).await.unwrap().is_some());
        assert!(PetgraphAlgorithms.shortest_path(&handle, 2, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_simple_paths_bounded() {
        let handle = diamond();
        let paths = PetgraphAlgorithms.all_simple_paths(&handle, 1, 4, 3).await.unwrap();
        let mut node_lists: Vec<Vec<EntityId>> = paths.iter().map(|p| p.nodes.clone()).collect();
        node_lists.sort();
        assert_eq!(node_lists, vec![vec![1, 2, 3, 4], vec![1, 3, 4]]);

        let short = PetgraphAlgorithms.all_simple_paths(&handle, 1, 4, 2).await.unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].nodes, vec![1, 3, 4]);
    }

    #[test]
    fn test_build_counts() {
        let handle = diamond();
        assert_eq!(handle.node_count(), 5);
        assert_eq!(handle.edge_count(), 4);
        assert!(handle.contains(5));
        assert_eq!(handle.edge(0).map(|e| e.pair_key()), Some((1, 2)));
    }
}
