//! In-process link and label store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{LabelLookupProvider, LinkDiscoveryProvider};
use crate::model::{EntityFilter, EntityId, EntitySummary, LinkType, TypedLink};
use crate::Result;

/// Entities, links and code labels held in memory.
///
/// Links come back with the label registered for their code (empty if none),
/// the same shape the SQLite store produces with its left join.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entities: BTreeMap<EntityId, EntitySummary>,
    links: Vec<TypedLink>,
    labels: HashMap<(LinkType, i64), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, id: EntityId, name: &str) -> Self {
        self.add_entity(EntitySummary::new(id, name));
        self
    }

    pub fn add_entity(&mut self, entity: EntitySummary) {
        self.entities.insert(entity.id, entity);
    }

    pub fn with_link(
        mut self,
        link_type: LinkType,
        source: EntityId,
        target: EntityId,
        code: i64,
    ) -> Self {
        self.add_link(TypedLink::new(link_type, source, target, code));
        self
    }

    pub fn add_link(&mut self, link: TypedLink) {
        self.links.push(link);
    }

    pub fn with_label(mut self, link_type: LinkType, code: i64, label: &str) -> Self {
        self.labels.insert((link_type, code), label.to_string());
        self
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn wanted(link: &TypedLink, include_kinship: bool, include_association: bool) -> bool {
        match link.link_type {
            LinkType::Kinship => include_kinship,
            LinkType::Association => include_association,
        }
    }

    fn labelled(&self, link: &TypedLink) -> TypedLink {
        let mut out = link.clone();
        if out.label.is_empty() {
            if let Some(label) = self.labels.get(&(link.link_type, link.link_code)) {
                out.label = label.clone();
            }
        }
        out
    }
}

#[async_trait]
impl LinkDiscoveryProvider for MemoryStore {
    async fn links_within_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<Vec<TypedLink>> {
        Ok(self
            .links
            .iter()
            .filter(|l| Self::wanted(l, include_kinship, include_association))
            .filter(|l| ids.contains(&l.source) && ids.contains(&l.target))
            .map(|l| self.labelled(l))
            .collect())
    }

    async fn links_from_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<BTreeMap<EntityId, Vec<TypedLink>>> {
        let mut out: BTreeMap<EntityId, Vec<TypedLink>> = BTreeMap::new();
        for link in self
            .links
            .iter()
            .filter(|l| Self::wanted(l, include_kinship, include_association))
        {
            let anchor = match (ids.contains(&link.source), ids.contains(&link.target)) {
                (true, false) => link.source,
                (false, true) => link.target,
                _ => continue,
            };
            out.entry(anchor).or_default().push(self.labelled(link));
        }
        Ok(out)
    }

    async fn load_entities(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<BTreeMap<EntityId, EntitySummary>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| (*id, e.clone())))
            .collect())
    }

    async fn filter_entities(
        &self,
        ids: &BTreeSet<EntityId>,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityId>> {
        Ok(ids
            .iter()
            .filter(|id| self.entities.get(id).is_some_and(|e| filter.matches(e)))
            .copied()
            .collect())
    }
}

#[async_trait]
impl LabelLookupProvider for MemoryStore {
    async fn labels_for_codes(
        &self,
        link_type: LinkType,
        codes: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, String>> {
        Ok(codes
            .iter()
            .filter_map(|code| {
                self.labels
                    .get(&(link_type, *code))
                    .map(|label| (*code, label.clone()))
            })
            .collect())
    }
}
