//! Pathway resolution between query entities.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::GraphCache;
use crate::graph::{GraphHandle, GraphPath};
use crate::model::{EntityId, NetworkEdge, Pathway, RelationKind};
use crate::provider::{with_timeout, GraphAlgorithmProvider};
use crate::Result;

/// `Σ(type_weight + 1/(edge_distance + 1)) / length`. Shorter, kinship-heavy
/// and closer paths score higher.
pub fn pathway_strength(edges: &[NetworkEdge]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    let total: f64 = edges
        .iter()
        .map(|e| e.link_type.type_weight() + 1.0 / (f64::from(e.edge_distance) + 1.0))
        .sum();
    total / edges.len() as f64
}

/// Strongest first; shorter paths win ties.
pub fn rank_pathways(pathways: &mut [Pathway]) {
    pathways.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.length.cmp(&b.length))
    });
}

/// Resolves paths over graph handles obtained through the shared cache.
pub struct PathwayResolver {
    algorithms: Arc<dyn GraphAlgorithmProvider>,
    cache: Arc<GraphCache>,
    timeout: Duration,
}

impl PathwayResolver {
    pub fn new(
        algorithms: Arc<dyn GraphAlgorithmProvider>,
        cache: Arc<GraphCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            algorithms,
            cache,
            timeout,
        }
    }

    /// One shortest-path attempt per unordered pair of query entities.
    /// Unreachable pairs are left out.
    pub async fn find_pathways(
        &self,
        edges: &[NetworkEdge],
        query_entities: &BTreeSet<EntityId>,
    ) -> Result<Vec<Pathway>> {
        if query_entities.len() < 2 {
            return Ok(Vec::new());
        }
        let handle = self.graph_for(edges, query_entities).await?;
        let by_pair = index_by_pair(edges);
        let ids: Vec<EntityId> = query_entities.iter().copied().collect();

        let mut pathways = Vec::new();
        for (i, from) in ids.iter().enumerate() {
            for to in &ids[i + 1..] {
                let found = with_timeout(
                    self.timeout,
                    self.algorithms.shortest_path(&handle, *from, *to),
                )
                .await?;
                if let Some(path) = found {
                    pathways.extend(to_pathway(&handle, path, &by_pair));
                }
            }
        }
        log::debug!(
            "Resolved {} pathways across {} query pairs",
            pathways.len(),
            ids.len() * (ids.len() - 1) / 2
        );
        Ok(pathways)
    }

    /// Every simple path from `from` to `to` with at most `max_length` edges.
    pub async fn find_all_paths(
        &self,
        edges: &[NetworkEdge],
        from: EntityId,
        to: EntityId,
        max_length: usize,
    ) -> Result<Vec<Pathway>> {
        let endpoints = BTreeSet::from([from, to]);
        let handle = self.graph_for(edges, &endpoints).await?;
        let paths = with_timeout(
            self.timeout,
            self.algorithms.all_simple_paths(&handle, from, to, max_length),
        )
        .await?;
        let by_pair = index_by_pair(edges);
        Ok(paths
            .into_iter()
            .filter_map(|p| to_pathway(&handle, p, &by_pair))
            .collect())
    }

    /// Bounded simple paths that visit every entity in `required`.
    pub async fn find_paths_through_nodes(
        &self,
        edges: &[NetworkEdge],
        from: EntityId,
        to: EntityId,
        required: &BTreeSet<EntityId>,
        max_length: usize,
    ) -> Result<Vec<Pathway>> {
        let paths = self.find_all_paths(edges, from, to, max_length).await?;
        Ok(paths
            .into_iter()
            .filter(|p| required.iter().all(|id| p.node_path.contains(id)))
            .collect())
    }

    async fn graph_for(
        &self,
        edges: &[NetworkEdge],
        extra_nodes: &BTreeSet<EntityId>,
    ) -> Result<Arc<GraphHandle>> {
        let mut nodes: BTreeSet<EntityId> = extra_nodes.clone();
        for edge in edges {
            nodes.insert(edge.source);
            nodes.insert(edge.target);
        }
        let nodes: Vec<EntityId> = nodes.into_iter().collect();

        let algorithms = Arc::clone(&self.algorithms);
        let timeout = self.timeout;
        let owned_nodes = nodes.clone();
        let owned_edges = edges.to_vec();
        self.cache
            .get_or_build(&nodes, edges, false, move || async move {
                with_timeout(
                    timeout,
                    algorithms.build_graph_handle(owned_nodes, owned_edges, false),
                )
                .await
            })
            .await
    }
}

type PairIndex<'a> = HashMap<(EntityId, EntityId), &'a NetworkEdge>;

/// First edge per unordered pair.
fn index_by_pair(edges: &[NetworkEdge]) -> PairIndex<'_> {
    let mut index = HashMap::with_capacity(edges.len());
    for edge in edges {
        index.entry(edge.pair_key()).or_insert(edge);
    }
    index
}

/// The cached handle supplies topology only. Edge annotations such as
/// distances and labels are taken from the caller's edges, since a handle may
/// have been built by a request with a different query set.
fn to_pathway(
    handle: &GraphHandle,
    path: GraphPath,
    by_pair: &PairIndex<'_>,
) -> Option<Pathway> {
    let edge_path: Vec<NetworkEdge> = path
        .edges
        .iter()
        .map(|i| {
            let cached = handle.edge(*i)?;
            by_pair.get(&cached.pair_key()).map(|e| (*e).clone())
        })
        .collect::<Option<_>>()?;
    if path.nodes.len() != edge_path.len() + 1 || edge_path.is_empty() {
        return None;
    }
    let path_type = RelationKind::from_types(edge_path.iter().map(|e| e.link_type))?;
    Some(Pathway {
        from_entity: *path.nodes.first()?,
        to_entity: *path.nodes.last()?,
        length: edge_path.len(),
        strength: pathway_strength(&edge_path),
        node_path: path.nodes,
        edge_path,
        path_type,
    })
}
