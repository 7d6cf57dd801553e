//! End-to-end network assembly for a set of query entities.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::bridge::find_bridge_nodes;
use super::discovery::{Discovery, NetworkDiscoveryEngine, MAX_HOPS};
use super::enrich::{deduplicate, enrich};
use super::pathway::{rank_pathways, PathwayResolver};
use super::view::NetworkView;
use crate::cache::GraphCache;
use crate::config::{Config, NetworkConfig};
use crate::graph::{compute_metrics, NetworkMetrics};
use crate::model::{
    BridgeNode, DiscoveredEntity, EntityFilter, EntityId, EntitySummary, NetworkEdge, Pathway,
};
use crate::provider::{
    with_timeout, GraphAlgorithmProvider, LabelLookupProvider, LinkDiscoveryProvider,
};
use crate::{RelnetError, Result};

/// Parameters of one network build.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub query_ids: Vec<EntityId>,
    pub max_hops: u8,
    pub include_kinship: bool,
    pub include_association: bool,
    /// Attribute filter applied to discovered entities. Query entities are
    /// never filtered out.
    pub filter: Option<EntityFilter>,
}

impl NetworkRequest {
    /// One hop, both link types, no filter.
    pub fn new(query_ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            query_ids: query_ids.into_iter().collect(),
            max_hops: 1,
            include_kinship: true,
            include_association: true,
            filter: None,
        }
    }

    /// Request with hop count and link types taken from configuration.
    pub fn from_config(
        query_ids: impl IntoIterator<Item = EntityId>,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            max_hops: config.default_max_hops,
            include_kinship: config.include_kinship,
            include_association: config.include_association,
            ..Self::new(query_ids)
        }
    }

    pub fn with_max_hops(mut self, max_hops: u8) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_kinship(mut self, include: bool) -> Self {
        self.include_kinship = include;
        self
    }

    pub fn with_association(mut self, include: bool) -> Self {
        self.include_association = include;
        self
    }

    pub fn with_filter(mut self, filter: EntityFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Assembled network around a set of query entities.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkResult {
    /// Query entities that resolved, in id order.
    pub query_entities: Vec<EntitySummary>,
    /// Non-query entities in discovery order.
    pub discovered_entities: Vec<DiscoveredEntity>,
    /// Attribute records for every entity in the network that the store knows.
    pub entities: BTreeMap<EntityId, EntitySummary>,
    pub edges: Vec<NetworkEdge>,
    /// Edges joining two query entities.
    pub direct_connections: Vec<NetworkEdge>,
    pub bridge_nodes: Vec<BridgeNode>,
    pub pathways: Vec<Pathway>,
    pub metrics: NetworkMetrics,
    pub query_time_ms: u64,
    /// More entities than the configured cap. The full network is still returned.
    pub truncated: bool,
    pub generated_at: DateTime<Utc>,
}

impl NetworkResult {
    pub fn query_ids(&self) -> BTreeSet<EntityId> {
        self.query_entities.iter().map(|e| e.id).collect()
    }

    /// Hop distance of an entity; 0 for query entities, None when absent.
    pub fn distance(&self, id: EntityId) -> Option<u8> {
        if self.query_entities.iter().any(|e| e.id == id) {
            return Some(0);
        }
        self.discovered_entities
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.min_distance)
    }

    pub fn entity_count(&self) -> usize {
        self.query_entities.len() + self.discovered_entities.len()
    }
}

/// Sequences discovery, filtering, enrichment, bridge and pathway analysis.
pub struct NetworkOrchestrator {
    links: Arc<dyn LinkDiscoveryProvider>,
    labels: Arc<dyn LabelLookupProvider>,
    discovery: NetworkDiscoveryEngine,
    pathways: PathwayResolver,
    cache: Arc<GraphCache>,
    entity_cap: usize,
    timeout: Duration,
}

impl NetworkOrchestrator {
    pub fn new(
        links: Arc<dyn LinkDiscoveryProvider>,
        labels: Arc<dyn LabelLookupProvider>,
        algorithms: Arc<dyn GraphAlgorithmProvider>,
        config: &Config,
    ) -> Self {
        let timeout = config.provider_timeout();
        let cache = Arc::new(GraphCache::new(config.cache.capacity, config.cache_ttl()));
        Self {
            discovery: NetworkDiscoveryEngine::new(Arc::clone(&links), timeout),
            pathways: PathwayResolver::new(algorithms, Arc::clone(&cache), timeout),
            links,
            labels,
            cache,
            entity_cap: config.network.entity_cap,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<GraphCache> {
        &self.cache
    }

    /// Drop every cached graph handle.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Build the network around `request.query_ids`.
    ///
    /// Fails with `InvalidArgument` for fewer than two distinct ids, and with
    /// `NotFound` when none of them exist. Unknown ids among known ones are
    /// dropped. Any provider failure or timeout fails the whole build.
    pub async fn build_network(&self, request: &NetworkRequest) -> Result<NetworkResult> {
        let start = Instant::now();
        let requested = validate(request)?;

        let known = with_timeout(self.timeout, self.links.load_entities(&requested)).await?;
        if known.is_empty() {
            return Err(RelnetError::NotFound(format!(
                "none of the query entities exist: {:?}",
                requested
            )));
        }
        let missing: Vec<EntityId> = requested
            .iter()
            .filter(|id| !known.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            log::warn!("Dropping unknown query entities: {:?}", missing);
        }
        let query: BTreeSet<EntityId> = known.keys().copied().collect();

        let mut discovery = self
            .discovery
            .discover(
                &query,
                request.max_hops,
                request.include_kinship,
                request.include_association,
            )
            .await?;

        if let Some(filter) = request.filter.as_ref().filter(|f| !f.is_empty()) {
            self.apply_filter(&mut discovery, &query, filter).await?;
        }

        let discovered_ids: BTreeSet<EntityId> = discovery.entities.iter().map(|e| e.id).collect();
        let mut entities = known;
        if !discovered_ids.is_empty() {
            let summaries =
                with_timeout(self.timeout, self.links.load_entities(&discovered_ids)).await?;
            entities.extend(summaries);
        }

        let edges = enrich(
            deduplicate(std::mem::take(&mut discovery.edges)),
            self.labels.as_ref(),
            self.timeout,
        )
        .await;

        let order: Vec<EntityId> = discovery.entities.iter().map(|e| e.id).collect();
        let (bridge_nodes, pathways) = tokio::join!(
            async { find_bridge_nodes(&edges, &query, &order) },
            self.pathways.find_pathways(&edges, &query),
        );
        let mut pathways = pathways?;
        rank_pathways(&mut pathways);

        let all_ids: Vec<EntityId> = query.iter().chain(order.iter()).copied().collect();
        let metrics = compute_metrics(&all_ids, &edges);
        let truncated = all_ids.len() > self.entity_cap;
        if truncated {
            log::warn!(
                "Network has {} entities, above the cap of {}",
                all_ids.len(),
                self.entity_cap
            );
        }

        let direct_connections = edges
            .iter()
            .filter(|e| e.edge_distance == 0)
            .cloned()
            .collect();
        let query_entities = query
            .iter()
            .filter_map(|id| entities.get(id).cloned())
            .collect();
        let query_time_ms = start.elapsed().as_millis() as u64;

        log::info!(
            "Built network for {} query entities: {} discovered, {} edges, {} bridges, \
             {} pathways in {}ms",
            query.len(),
            discovery.entities.len(),
            edges.len(),
            bridge_nodes.len(),
            pathways.len(),
            query_time_ms
        );

        Ok(NetworkResult {
            query_entities,
            discovered_entities: discovery.entities,
            entities,
            edges,
            direct_connections,
            bridge_nodes,
            pathways,
            metrics,
            query_time_ms,
            truncated,
            generated_at: Utc::now(),
        })
    }

    /// Visualization view of a built network.
    pub fn view(&self, result: &NetworkResult) -> NetworkView {
        NetworkView::from_result(result)
    }

    /// Drop discovered entities failing `filter`, with every edge touching them.
    async fn apply_filter(
        &self,
        discovery: &mut Discovery,
        query: &BTreeSet<EntityId>,
        filter: &EntityFilter,
    ) -> Result<()> {
        let candidates: BTreeSet<EntityId> = discovery.entities.iter().map(|e| e.id).collect();
        if candidates.is_empty() {
            return Ok(());
        }
        let kept: BTreeSet<EntityId> = with_timeout(
            self.timeout,
            self.links.filter_entities(&candidates, filter),
        )
        .await?
        .into_iter()
        .collect();

        let before = discovery.entities.len();
        discovery.entities.retain(|e| kept.contains(&e.id));
        let retained = |id: &EntityId| query.contains(id) || kept.contains(id);
        discovery
            .edges
            .retain(|e| retained(&e.source) && retained(&e.target));
        discovery.distances.retain(|id, _| retained(id));
        log::debug!(
            "Filter kept {}/{} discovered entities, {} edges remain",
            discovery.entities.len(),
            before,
            discovery.edges.len()
        );
        Ok(())
    }
}

fn validate(request: &NetworkRequest) -> Result<BTreeSet<EntityId>> {
    let ids: BTreeSet<EntityId> = request.query_ids.iter().copied().collect();
    if ids.len() < 2 {
        return Err(RelnetError::InvalidArgument(format!(
            "at least two distinct query entities are required, got {}",
            ids.len()
        )));
    }
    if request.max_hops > MAX_HOPS {
        return Err(RelnetError::InvalidArgument(format!(
            "max_hops must be at most {}, got {}",
            MAX_HOPS, request.max_hops
        )));
    }
    if !request.include_kinship && !request.include_association {
        return Err(RelnetError::InvalidArgument(
            "at least one link type must be included".to_string(),
        ));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PetgraphAlgorithms;
    use crate::model::{LinkType, RelationKind, TypedLink};
    use crate::provider::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Su Shi (1762) and Su Zhe (1760) are brothers, both sons of Su Xun (1758).
    /// Ouyang Xiu (3767) examined Su Shi and knew Su Xun.
    fn su_family() -> MemoryStore {
        let mut store = MemoryStore::new()
            .with_link(LinkType::Kinship, 1762, 1760, 75)
            .with_link(LinkType::Kinship, 1762, 1758, 1)
            .with_link(LinkType::Kinship, 1760, 1758, 1)
            .with_link(LinkType::Association, 3767, 1762, 22)
            .with_link(LinkType::Association, 3767, 1758, 40)
            .with_label(LinkType::Kinship, 75, "younger brother")
            .with_label(LinkType::Kinship, 1, "father");
        store.add_entity(EntitySummary::new(1762, "Su Shi").with_index_year(1096));
        store.add_entity(EntitySummary::new(1760, "Su Zhe").with_index_year(1099));
        store.add_entity(EntitySummary::new(1758, "Su Xun").with_index_year(1066));
        store.add_entity(EntitySummary::new(3767, "Ouyang Xiu").with_index_year(1067));
        store
    }

    fn orchestrator_with(
        links: Arc<dyn LinkDiscoveryProvider>,
        config: &Config,
    ) -> NetworkOrchestrator {
        NetworkOrchestrator::new(
            links,
            Arc::new(MemoryStore::new().with_label(LinkType::Kinship, 75, "younger brother")),
            Arc::new(PetgraphAlgorithms),
            config,
        )
    }

    fn orchestrator(store: MemoryStore) -> NetworkOrchestrator {
        let store = Arc::new(store);
        NetworkOrchestrator::new(
            store.clone(),
            store,
            Arc::new(PetgraphAlgorithms),
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_siblings_zero_hops() {
        let result = orchestrator(su_family())
            .build_network(
                &NetworkRequest::new([1762, 1760])
                    .with_max_hops(0)
                    .with_association(false),
            )
            .await
            .unwrap();
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].link_type, LinkType::Kinship);
        assert_eq!(result.edges[0].edge_distance, 0);
        assert_eq!(result.edges[0].label, "younger brother");
        assert!(result.discovered_entities.is_empty());
        assert_eq!(result.direct_connections.len(), 1);
        assert_eq!(result.pathways.len(), 1);
        assert_eq!(result.pathways[0].length, 1);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_siblings_one_hop_shared_parent_bridges() {
        let result = orchestrator(su_family())
            .build_network(&NetworkRequest::new([1762, 1760]).with_max_hops(1))
            .await
            .unwrap();
        assert_eq!(result.distance(1758), Some(1));
        assert_eq!(result.distance(3767), Some(1));
        assert_eq!(result.distance(1762), Some(0));

        let father = result.bridge_nodes.iter().find(|b| b.entity_id == 1758).unwrap();
        assert!(father.bridge_score >= 2.0);
        assert_eq!(father.bridge_type, RelationKind::Kinship);
        assert!(result.bridge_nodes.iter().all(|b| b.connects_to_query_entities.len() >= 2));

        assert_eq!(result.metrics.node_count, 4);
        assert_eq!(result.metrics.edge_count, result.edges.len());
        assert_eq!(result.entities[&1758].name, "Su Xun");
        assert_eq!(result.query_entities.len(), 2);
    }

    #[tokio::test]
    async fn test_single_id_is_invalid() {
        let err = orchestrator(su_family())
            .build_network(&NetworkRequest::new([1762, 1762]))
            .await
            .unwrap_err();
        assert!(matches!(err, RelnetError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unknown_ids_not_found() {
        let err = orchestrator(su_family())
            .build_network(&NetworkRequest::new([424242, 434343]))
            .await
            .unwrap_err();
        assert!(matches!(err, RelnetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_id_dropped() {
        let result = orchestrator(su_family())
            .build_network(&NetworkRequest::new([1762, 999_999]).with_max_hops(1))
            .await
            .unwrap();
        assert_eq!(result.query_ids(), BTreeSet::from([1762]));
        assert!(result.pathways.is_empty());
        assert!(result.bridge_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_hops_and_no_link_types() {
        let o = orchestrator(su_family());
        let err = o
            .build_network(&NetworkRequest::new([1762, 1760]).with_max_hops(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RelnetError::InvalidArgument(_)));
        let err = o
            .build_network(
                &NetworkRequest::new([1762, 1760])
                    .with_kinship(false)
                    .with_association(false),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelnetError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_shared_graph_keeps_request_edge_distances() {
        let store = MemoryStore::new()
            .with_entity(1, "A")
            .with_entity(2, "B")
            .with_entity(3, "C")
            .with_link(LinkType::Kinship, 1, 2, 5)
            .with_link(LinkType::Kinship, 2, 3, 5)
            .with_link(LinkType::Kinship, 1, 3, 5);
        let o = orchestrator(store);
        o.build_network(&NetworkRequest::new([1, 2])).await.unwrap();
        let result = o.build_network(&NetworkRequest::new([1, 3])).await.unwrap();
        // Both runs assemble the same triangle, so the graph is reused.
        assert_eq!(o.cache().stats().builds, 1);

        let direct = result.edges.iter().find(|e| e.pair_key() == (1, 3)).unwrap();
        assert_eq!(direct.edge_distance, 0);
        let pathway = &result.pathways[0];
        assert_eq!(pathway.length, 1);
        assert_eq!(pathway.edge_path[0].edge_distance, 0);
        assert_eq!(pathway.strength, 3.0);
    }

    #[tokio::test]
    async fn test_idempotent_runs() {
        let o = orchestrator(su_family());
        let request = NetworkRequest::new([1762, 1760]).with_max_hops(2);
        let first = o.build_network(&request).await.unwrap();
        let second = o.build_network(&request).await.unwrap();

        let edge_set = |r: &NetworkResult| -> HashSet<(EntityId, EntityId, LinkType)> {
            r.edges
                .iter()
                .map(|e| (e.pair_key().0, e.pair_key().1, e.link_type))
                .collect()
        };
        assert_eq!(edge_set(&first), edge_set(&second));
        let bridges = |r: &NetworkResult| -> BTreeSet<EntityId> {
            r.bridge_nodes.iter().map(|b| b.entity_id).collect()
        };
        assert_eq!(bridges(&first), bridges(&second));
        // Second run reuses the pathway graph.
        assert_eq!(o.cache().stats().builds, 1);
        assert!(o.cache().stats().hits >= 1);

        o.invalidate_cache();
        assert!(o.cache().is_empty());
    }

    #[tokio::test]
    async fn test_filter_drops_discovered_not_query() {
        let filter = EntityFilter {
            index_year_max: Some(1066),
            ..EntityFilter::default()
        };
        let result = orchestrator(su_family())
            .build_network(&NetworkRequest::new([1762, 1760]).with_filter(filter))
            .await
            .unwrap();
        // Query entities stay even though they fail the year bound.
        assert_eq!(result.query_entities.len(), 2);
        let ids: Vec<EntityId> = result.discovered_entities.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1758]);
        assert!(result.edges.iter().all(|e| !e.touches(3767)));
    }

    #[tokio::test]
    async fn test_truncation_is_a_flag() {
        let mut config = Config::default();
        config.network.entity_cap = 2;
        let result = orchestrator_with(Arc::new(su_family()), &config)
            .build_network(&NetworkRequest::new([1762, 1760]))
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.entity_count(), 4);
    }

    /// Answers entity lookups, then never returns from link expansion.
    struct StalledLinks {
        inner: MemoryStore,
    }

    #[async_trait]
    impl LinkDiscoveryProvider for StalledLinks {
        async fn links_within_group(
            &self,
            ids: &BTreeSet<EntityId>,
            kinship: bool,
            association: bool,
        ) -> Result<Vec<TypedLink>> {
            self.inner.links_within_group(ids, kinship, association).await
        }
        async fn links_from_group(
            &self,
            _: &BTreeSet<EntityId>,
            _: bool,
            _: bool,
        ) -> Result<BTreeMap<EntityId, Vec<TypedLink>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BTreeMap::new())
        }
        async fn load_entities(
            &self,
            ids: &BTreeSet<EntityId>,
        ) -> Result<BTreeMap<EntityId, EntitySummary>> {
            self.inner.load_entities(ids).await
        }
        async fn filter_entities(
            &self,
            ids: &BTreeSet<EntityId>,
            filter: &EntityFilter,
        ) -> Result<Vec<EntityId>> {
            self.inner.filter_entities(ids, filter).await
        }
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let mut config = Config::default();
        config.network.provider_timeout_ms = 50;
        let links = Arc::new(StalledLinks { inner: su_family() });
        let err = orchestrator_with(links, &config)
            .build_network(&NetworkRequest::new([1762, 1760]))
            .await
            .unwrap_err();
        assert!(matches!(err, RelnetError::Timeout(50)));
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn test_view_marks_roles() {
        let o = orchestrator(su_family());
        let result = o
            .build_network(&NetworkRequest::new([1762, 1760]))
            .await
            .unwrap();
        let view = o.view(&result);
        assert_eq!(view.nodes.len(), 4);
        assert_eq!(view.edges.len(), result.edges.len());
    }
}
