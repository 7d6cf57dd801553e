//! Bridge detection: discovered entities tied to two or more query entities.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{BridgeNode, EntityId, LinkType, NetworkEdge, RelationKind};

#[derive(Default)]
struct Connections {
    labels: BTreeMap<EntityId, Vec<String>>,
    types: Vec<LinkType>,
}

/// Score a candidate: distinct query count, plus half a point for every
/// repeated relation to the same query entity.
pub fn bridge_score(connection_types: &BTreeMap<EntityId, Vec<String>>) -> f64 {
    let breadth = connection_types.len() as f64;
    let multiplicity: usize = connection_types
        .values()
        .map(|labels| labels.len().saturating_sub(1))
        .sum();
    breadth + 0.5 * multiplicity as f64
}

/// Find entities linked directly to at least two distinct query entities.
///
/// Sorted by score, highest first; ties keep discovery order (`all_entities`
/// order, then first appearance in `edges` for anything not listed).
pub fn find_bridge_nodes(
    edges: &[NetworkEdge],
    query_entities: &BTreeSet<EntityId>,
    all_entities: &[EntityId],
) -> Vec<BridgeNode> {
    let mut candidates: HashMap<EntityId, Connections> = HashMap::new();
    let mut first_seen: Vec<EntityId> = Vec::new();

    for edge in edges {
        let (query, other) = match (
            query_entities.contains(&edge.source),
            query_entities.contains(&edge.target),
        ) {
            (true, false) => (edge.source, edge.target),
            (false, true) => (edge.target, edge.source),
            _ => continue,
        };
        let entry = candidates.entry(other).or_insert_with(|| {
            first_seen.push(other);
            Connections::default()
        });
        entry.labels.entry(query).or_default().push(edge.label.clone());
        entry.types.push(edge.link_type);
    }

    let rank: HashMap<EntityId, usize> = all_entities
        .iter()
        .chain(first_seen.iter())
        .enumerate()
        .fold(HashMap::new(), |mut acc, (i, id)| {
            acc.entry(*id).or_insert(i);
            acc
        });

    let mut bridges: Vec<BridgeNode> = candidates
        .into_iter()
        .filter(|(_, c)| c.labels.len() >= 2)
        .filter_map(|(id, c)| {
            let bridge_type = RelationKind::from_types(c.types.iter().copied())?;
            Some(BridgeNode {
                entity_id: id,
                connects_to_query_entities: c.labels.keys().copied().collect(),
                bridge_score: bridge_score(&c.labels),
                connection_types: c.labels,
                bridge_type,
            })
        })
        .collect();

    bridges.sort_by_key(|b| rank.get(&b.entity_id).copied().unwrap_or(usize::MAX));
    bridges.sort_by(|a, b| b.bridge_score.total_cmp(&a.bridge_score));
    bridges
}
