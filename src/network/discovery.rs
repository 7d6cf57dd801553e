//! Bounded multi-phase breadth expansion from a set of query entities.
//!
//! Phase 0 collects links among the query entities, phase 1 expands one hop
//! from them, phase 2 expands one more hop from the distance-1 frontier. Each
//! phase also picks up the induced links among everything seen so far. The
//! phases run strictly in order; lookups inside a phase may overlap.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::{DiscoveredEntity, EntityId, NetworkEdge, TypedLink};
use crate::provider::{with_timeout, LinkDiscoveryProvider};
use crate::{RelnetError, Result};

/// Largest supported hop count.
pub const MAX_HOPS: u8 = 2;

/// Output of one discovery run.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Non-query entities in the order they were first reached.
    pub entities: Vec<DiscoveredEntity>,
    /// At most one edge per unordered endpoint pair.
    pub edges: Vec<NetworkEdge>,
    /// Hop distance of every reached entity, query entities at 0. Unreached
    /// entities are absent.
    pub distances: BTreeMap<EntityId, u8>,
}

impl Discovery {
    pub fn distance(&self, id: EntityId) -> Option<u8> {
        self.distances.get(&id).copied()
    }
}

/// Per-run bookkeeping. Distances and edge classifications are written once.
struct DiscoveryState<'a> {
    query: &'a BTreeSet<EntityId>,
    distances: BTreeMap<EntityId, u8>,
    order: Vec<EntityId>,
    connects: HashMap<EntityId, BTreeSet<EntityId>>,
    edges: Vec<NetworkEdge>,
    seen_pairs: HashSet<(EntityId, EntityId)>,
}

impl<'a> DiscoveryState<'a> {
    fn new(query: &'a BTreeSet<EntityId>) -> Self {
        Self {
            query,
            distances: query.iter().map(|id| (*id, 0)).collect(),
            order: Vec::new(),
            connects: HashMap::new(),
            edges: Vec::new(),
            seen_pairs: HashSet::new(),
        }
    }

    fn is_query(&self, id: EntityId) -> bool {
        self.query.contains(&id)
    }

    /// Record `id` at `distance` unless it already has one. Returns true if new.
    fn reach(&mut self, id: EntityId, distance: u8) -> bool {
        if self.distances.contains_key(&id) {
            return false;
        }
        self.distances.insert(id, distance);
        self.order.push(id);
        true
    }

    fn add_connections(&mut self, id: EntityId, query_ids: &BTreeSet<EntityId>) {
        if self.is_query(id) {
            return;
        }
        self.connects.entry(id).or_default().extend(query_ids.iter().copied());
    }

    /// Classify by query membership: both ends 0, one end 1, neither 2.
    fn edge_distance(&self, link: &TypedLink) -> u8 {
        match (self.is_query(link.source), self.is_query(link.target)) {
            (true, true) => 0,
            (true, false) | (false, true) => 1,
            (false, false) => 2,
        }
    }

    /// Record `link` unless its endpoint pair is already present.
    fn record_edge(&mut self, link: TypedLink, node_distance: u8) -> bool {
        if link.source == link.target || !self.seen_pairs.insert(link.pair_key()) {
            return false;
        }
        let edge_distance = self.edge_distance(&link);
        self.edges.push(NetworkEdge::from_link(link, edge_distance, node_distance));
        true
    }

    fn members_at(&self, distance: u8) -> BTreeSet<EntityId> {
        self.distances
            .iter()
            .filter(|(_, d)| **d == distance)
            .map(|(id, _)| *id)
            .collect()
    }

    fn reached(&self) -> BTreeSet<EntityId> {
        self.distances.keys().copied().collect()
    }

    fn finish(mut self) -> Discovery {
        let entities = self
            .order
            .iter()
            .map(|id| DiscoveredEntity {
                id: *id,
                min_distance: self.distances[id],
                connects_to_query: self.connects.remove(id).unwrap_or_default(),
            })
            .collect();
        Discovery {
            entities,
            edges: self.edges,
            distances: self.distances,
        }
    }
}

/// Runs discovery against a link provider.
pub struct NetworkDiscoveryEngine {
    links: Arc<dyn LinkDiscoveryProvider>,
    timeout: Duration,
}

impl NetworkDiscoveryEngine {
    pub fn new(links: Arc<dyn LinkDiscoveryProvider>, timeout: Duration) -> Self {
        Self { links, timeout }
    }

    /// Discover the network around `query_ids` within `max_hops` hops.
    ///
    /// Any provider failure or timeout aborts the run; no partial result is returned.
    pub async fn discover(
        &self,
        query_ids: &BTreeSet<EntityId>,
        max_hops: u8,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<Discovery> {
        if max_hops > MAX_HOPS {
            return Err(RelnetError::InvalidArgument(format!(
                "max_hops must be at most {}, got {}",
                MAX_HOPS, max_hops
            )));
        }
        let types = (include_kinship, include_association);
        let mut state = DiscoveryState::new(query_ids);
        if query_ids.is_empty() {
            return Ok(state.finish());
        }

        // Phase 0: links among the query entities.
        let start = Instant::now();
        let direct = self.within_group(query_ids, types).await?;
        let mut added = 0;
        for link in direct {
            added += state.record_edge(link, 0) as usize;
        }
        log::debug!("Discovery phase 0: {} direct edges in {:?}", added, start.elapsed());

        if max_hops >= 1 {
            self.expand(&mut state, query_ids.clone(), 1, types).await?;
        }

        if max_hops >= 2 {
            let frontier = state.members_at(1);
            if frontier.is_empty() {
                log::debug!("Discovery phase 2 skipped: empty distance-1 frontier");
            } else {
                self.expand(&mut state, frontier, 2, types).await?;
            }
        }

        let discovery = state.finish();
        log::debug!(
            "Discovery complete: {} query, {} discovered, {} edges",
            query_ids.len(),
            discovery.entities.len(),
            discovery.edges.len()
        );
        Ok(discovery)
    }

    /// One expansion phase: step outward from `seeds`, then collect the induced
    /// links over everything reached so far.
    async fn expand(
        &self,
        state: &mut DiscoveryState<'_>,
        seeds: BTreeSet<EntityId>,
        depth: u8,
        types: (bool, bool),
    ) -> Result<()> {
        let start = Instant::now();
        let outward = self.from_group(&seeds, types).await?;

        let mut new_entities = 0;
        let mut new_edges = 0;
        for (seed, links) in outward {
            let seed_queries: BTreeSet<EntityId> = if state.is_query(seed) {
                BTreeSet::from([seed])
            } else {
                state.connects.get(&seed).cloned().unwrap_or_default()
            };
            for link in links {
                let Some(other) = link.other(seed) else {
                    continue;
                };
                // Query entities are terminal for expansion beyond phase 1.
                if depth > 1 && state.is_query(other) {
                    continue;
                }
                if state.reach(other, depth) {
                    new_entities += 1;
                }
                if state.distances.get(&other) == Some(&depth) {
                    state.add_connections(other, &seed_queries);
                }
                new_edges += state.record_edge(link, depth) as usize;
            }
        }

        let expanded = state.reached();
        let induced = self.within_group(&expanded, types).await?;
        let mut induced_edges = 0;
        for link in induced {
            induced_edges += state.record_edge(link, depth) as usize;
        }

        log::debug!(
            "Discovery phase {}: {} seeds, {} new entities, {} edges, {} induced edges in {:?}",
            depth,
            seeds.len(),
            new_entities,
            new_edges,
            induced_edges,
            start.elapsed()
        );
        Ok(())
    }

    /// Kinship and association lookups for the same group run concurrently.
    async fn within_group(
        &self,
        ids: &BTreeSet<EntityId>,
        (kinship, association): (bool, bool),
    ) -> Result<Vec<TypedLink>> {
        let (mut kin, assoc) = tokio::try_join!(
            self.timed(async {
                if kinship {
                    self.links.links_within_group(ids, true, false).await
                } else {
                    Ok(Vec::new())
                }
            }),
            self.timed(async {
                if association {
                    self.links.links_within_group(ids, false, true).await
                } else {
                    Ok(Vec::new())
                }
            }),
        )?;
        kin.extend(assoc);
        Ok(kin)
    }

    async fn from_group(
        &self,
        ids: &BTreeSet<EntityId>,
        (kinship, association): (bool, bool),
    ) -> Result<BTreeMap<EntityId, Vec<TypedLink>>> {
        let (mut kin, assoc) = tokio::try_join!(
            self.timed(async {
                if kinship {
                    self.links.links_from_group(ids, true, false).await
                } else {
                    Ok(BTreeMap::new())
                }
            }),
            self.timed(async {
                if association {
                    self.links.links_from_group(ids, false, true).await
                } else {
                    Ok(BTreeMap::new())
                }
            }),
        )?;
        for (id, links) in assoc {
            kin.entry(id).or_default().extend(links);
        }
        Ok(kin)
    }

    async fn timed<T, F>(&self, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        with_timeout(self.timeout, call).await
    }
}
