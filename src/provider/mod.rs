//! Capability interfaces consumed by the network engine, plus reference backends.
//!
//! Discovery logic only ever talks to these traits, so a store or algorithm
//! backend can be swapped without touching it.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use crate::graph::{GraphHandle, GraphPath};
use crate::model::{EntityFilter, EntityId, EntitySummary, LinkType, NetworkEdge, TypedLink};
use crate::{RelnetError, Result};

/// Typed-link lookups over the entity store.
#[async_trait]
pub trait LinkDiscoveryProvider: Send + Sync {
    /// All links whose endpoints are both members of `ids`.
    async fn links_within_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<Vec<TypedLink>>;

    /// Links with exactly one endpoint in `ids`, keyed by that endpoint.
    async fn links_from_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<BTreeMap<EntityId, Vec<TypedLink>>>;

    /// Attribute records for the ids that exist; unknown ids are absent from the map.
    async fn load_entities(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<BTreeMap<EntityId, EntitySummary>>;

    /// The subset of `ids` satisfying `filter`.
    async fn filter_entities(
        &self,
        ids: &BTreeSet<EntityId>,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityId>>;
}

/// Code to label resolution.
#[async_trait]
pub trait LabelLookupProvider: Send + Sync {
    async fn labels_for_codes(
        &self,
        link_type: LinkType,
        codes: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, String>>;
}

/// Graph construction and path algorithms.
#[async_trait]
pub trait GraphAlgorithmProvider: Send + Sync {
    async fn build_graph_handle(
        &self,
        nodes: Vec<EntityId>,
        edges: Vec<NetworkEdge>,
        directed: bool,
    ) -> Result<GraphHandle>;

    async fn shortest_path(
        &self,
        handle: &GraphHandle,
        source: EntityId,
        target: EntityId,
    ) -> Result<Option<GraphPath>>;

    async fn all_simple_paths(
        &self,
        handle: &GraphHandle,
        source: EntityId,
        target: EntityId,
        max_length: usize,
    ) -> Result<Vec<GraphPath>>;
}

/// Run a provider call under a deadline. Elapsed deadlines surface as `Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RelnetError::Timeout(timeout.as_millis() as u64)),
    }
}
