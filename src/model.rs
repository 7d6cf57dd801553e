//! Core data model: entities, typed links, network edges, bridges and pathways.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque identifier of a biographical entity.
pub type EntityId = i64;

/// The two relation families stored for entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Kinship,
    Association,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Kinship => "kinship",
            LinkType::Association => "association",
        }
    }

    /// Weight used when ranking pathways; kinship ties count double.
    pub fn type_weight(&self) -> f64 {
        match self {
            LinkType::Kinship => 2.0,
            LinkType::Association => 1.0,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Kinship => write!(f, "Kinship"),
            LinkType::Association => write!(f, "Association"),
        }
    }
}

/// Aggregate relation kind of a bridge node or pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Kinship,
    Association,
    Mixed,
}

impl RelationKind {
    /// Fold observed link types into a single kind. None when nothing was observed.
    pub fn from_types<I>(types: I) -> Option<RelationKind>
    where
        I: IntoIterator<Item = LinkType>,
    {
        let mut kinship = false;
        let mut association = false;
        for t in types {
            match t {
                LinkType::Kinship => kinship = true,
                LinkType::Association => association = true,
            }
        }
        match (kinship, association) {
            (true, true) => Some(RelationKind::Mixed),
            (true, false) => Some(RelationKind::Kinship),
            (false, true) => Some(RelationKind::Association),
            (false, false) => None,
        }
    }
}

/// Unordered endpoint pair, smaller id first.
pub fn pair_key(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A typed relationship record as returned by a link provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedLink {
    pub source: EntityId,
    pub target: EntityId,
    pub link_type: LinkType,
    pub link_code: i64,
    /// Human-readable label; empty when the store has none.
    pub label: String,
}

impl TypedLink {
    pub fn new(link_type: LinkType, source: EntityId, target: EntityId, link_code: i64) -> Self {
        Self {
            source,
            target,
            link_type,
            link_code,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn pair_key(&self) -> (EntityId, EntityId) {
        pair_key(self.source, self.target)
    }

    /// The endpoint opposite to `id`, if `id` is an endpoint at all.
    pub fn other(&self, id: EntityId) -> Option<EntityId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// An edge of a discovered network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: EntityId,
    pub target: EntityId,
    pub link_type: LinkType,
    pub link_code: i64,
    pub label: String,
    /// 0 when both endpoints are query entities, 1 when exactly one is, 2 otherwise.
    /// Fixed when the edge is first recorded.
    pub edge_distance: u8,
    /// BFS depth at which the edge's far endpoint was first discovered.
    pub node_distance: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl NetworkEdge {
    pub fn from_link(link: TypedLink, edge_distance: u8, node_distance: u8) -> Self {
        Self {
            source: link.source,
            target: link.target,
            link_type: link.link_type,
            link_code: link.link_code,
            label: link.label,
            edge_distance,
            node_distance,
            metadata: BTreeMap::new(),
        }
    }

    pub fn pair_key(&self) -> (EntityId, EntityId) {
        pair_key(self.source, self.target)
    }

    pub fn touches(&self, id: EntityId) -> bool {
        self.source == id || self.target == id
    }

    pub fn other(&self, id: EntityId) -> Option<EntityId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// An entity reached by expansion (never a query entity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    pub id: EntityId,
    /// Hop count from the nearest query entity: 1 or 2.
    pub min_distance: u8,
    /// Query entities this entity was reached from.
    pub connects_to_query: BTreeSet<EntityId>,
}

/// Attribute record of an entity as loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
    pub index_year: Option<i32>,
    #[serde(default)]
    pub female: bool,
    pub dynasty: Option<i64>,
}

impl EntitySummary {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            index_year: None,
            female: false,
            dynasty: None,
        }
    }

    pub fn with_index_year(mut self, year: i32) -> Self {
        self.index_year = Some(year);
        self
    }

    pub fn with_female(mut self, female: bool) -> Self {
        self.female = female;
        self
    }

    pub fn with_dynasty(mut self, dynasty: i64) -> Self {
        self.dynasty = Some(dynasty);
        self
    }
}

/// Conjunctive attribute predicate applied to discovered entities.
///
/// Entities whose index year is unknown fail any year bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub index_year_min: Option<i32>,
    pub index_year_max: Option<i32>,
    pub female: Option<bool>,
    pub dynasty: Option<i64>,
}

impl EntityFilter {
    pub fn is_empty(&self) -> bool {
        self.index_year_min.is_none()
            && self.index_year_max.is_none()
            && self.female.is_none()
            && self.dynasty.is_none()
    }

    pub fn matches(&self, entity: &EntitySummary) -> bool {
        if self.index_year_min.is_some() || self.index_year_max.is_some() {
            let Some(year) = entity.index_year else {
                return false;
            };
            if self.index_year_min.is_some_and(|min| year < min) {
                return false;
            }
            if self.index_year_max.is_some_and(|max| year > max) {
                return false;
            }
        }
        if self.female.is_some_and(|f| f != entity.female) {
            return false;
        }
        if let Some(dynasty) = self.dynasty {
            if entity.dynasty != Some(dynasty) {
                return false;
            }
        }
        true
    }
}

/// A discovered entity connected to two or more distinct query entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeNode {
    pub entity_id: EntityId,
    pub connects_to_query_entities: Vec<EntityId>,
    /// Relation labels per connected query entity.
    pub connection_types: BTreeMap<EntityId, Vec<String>>,
    pub bridge_type: RelationKind,
    pub bridge_score: f64,
}

/// A simple path between two query entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathway {
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    /// Always one longer than `edge_path`.
    pub node_path: Vec<EntityId>,
    pub edge_path: Vec<NetworkEdge>,
    pub length: usize,
    pub path_type: RelationKind,
    pub strength: f64,
}
