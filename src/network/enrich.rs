//! Edge post-processing: label resolution, deduplication, direction normalization.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use crate::model::{LinkType, NetworkEdge};
use crate::provider::{with_timeout, LabelLookupProvider};

/// Metadata key set when `normalize_direction` swapped an edge's endpoints.
pub const SWAPPED_KEY: &str = "swapped";

/// Label used when a code has no entry in the lookup.
pub fn fallback_label(link_type: LinkType, code: i64) -> String {
    format!("{} {}", link_type, code)
}

/// Fill in missing labels. Distinct codes are looked up in one batch per link
/// type; anything unresolved, including a failed lookup, gets the fallback
/// label. Never fails.
pub async fn enrich(
    mut edges: Vec<NetworkEdge>,
    labels: &dyn LabelLookupProvider,
    timeout: Duration,
) -> Vec<NetworkEdge> {
    let mut wanted: BTreeMap<LinkType, BTreeSet<i64>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.label.is_empty()) {
        wanted.entry(edge.link_type).or_default().insert(edge.link_code);
    }

    let mut resolved: HashMap<(LinkType, i64), String> = HashMap::new();
    for (link_type, codes) in wanted {
        match with_timeout(timeout, labels.labels_for_codes(link_type, &codes)).await {
            Ok(found) => {
                log::debug!(
                    "Resolved {}/{} {} labels",
                    found.len(),
                    codes.len(),
                    link_type.as_str()
                );
                resolved.extend(found.into_iter().map(|(code, label)| ((link_type, code), label)));
            }
            Err(e) => {
                log::warn!("{} label lookup failed, using fallbacks: {}", link_type, e);
            }
        }
    }

    for edge in edges.iter_mut().filter(|e| e.label.is_empty()) {
        edge.label = match resolved.get(&(edge.link_type, edge.link_code)) {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => fallback_label(edge.link_type, edge.link_code),
        };
    }
    edges
}

/// Non-empty label +2, non-zero code +1, +1 per metadata key.
fn information_score(edge: &NetworkEdge) -> usize {
    let mut score = edge.metadata.len();
    if !edge.label.is_empty() {
        score += 2;
    }
    if edge.link_code != 0 {
        score += 1;
    }
    score
}

/// Collapse edges sharing an unordered endpoint pair, keeping the most
/// informative one. Ties keep the earlier edge; output follows first appearance.
pub fn deduplicate(edges: Vec<NetworkEdge>) -> Vec<NetworkEdge> {
    let mut slots: HashMap<(i64, i64), usize> = HashMap::with_capacity(edges.len());
    let mut out: Vec<NetworkEdge> = Vec::with_capacity(edges.len());
    for edge in edges {
        match slots.get(&edge.pair_key()) {
            Some(&i) => {
                if information_score(&edge) > information_score(&out[i]) {
                    out[i] = edge;
                }
            }
            None => {
                slots.insert(edge.pair_key(), out.len());
                out.push(edge);
            }
        }
    }
    out
}

/// Put the smaller id in `source` for undirected consumers.
pub fn normalize_direction(edges: Vec<NetworkEdge>) -> Vec<NetworkEdge> {
    edges
        .into_iter()
        .map(|mut edge| {
            if edge.source > edge.target {
                std::mem::swap(&mut edge.source, &mut edge.target);
                edge.metadata.insert(SWAPPED_KEY.to_string(), "true".to_string());
            }
            edge
        })
        .collect()
}

pub fn group_by_type(edges: &[NetworkEdge]) -> BTreeMap<LinkType, Vec<NetworkEdge>> {
    let mut groups: BTreeMap<LinkType, Vec<NetworkEdge>> = BTreeMap::new();
    for edge in edges {
        groups.entry(edge.link_type).or_default().push(edge.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypedLink;
    use crate::provider::MemoryStore;
    use crate::{RelnetError, Result};
    use async_trait::async_trait;

    fn edge(t: LinkType, a: i64, b: i64, code: i64) -> NetworkEdge {
        NetworkEdge::from_link(TypedLink::new(t, a, b, code), 1, 1)
    }

    #[tokio::test]
    async fn test_enrich_resolves_and_falls_back() {
        let labels = MemoryStore::new()
            .with_label(LinkType::Kinship, 75, "younger brother")
            .with_label(LinkType::Association, 22, "examiner of");
        let mut preset = edge(LinkType::Kinship, 5, 6, 75);
        preset.label = "kept".to_string();
        let edges = vec![
            edge(LinkType::Kinship, 1, 2, 75),
            edge(LinkType::Association, 2, 3, 22),
            edge(LinkType::Association, 3, 4, 999),
            preset,
        ];
        let out = enrich(edges, &labels, Duration::from_secs(1)).await;
        assert_eq!(out[0].label, "younger brother");
        assert_eq!(out[1].label, "examiner of");
        assert_eq!(out[2].label, "Association 999");
        assert_eq!(out[3].label, "kept");
    }

    struct BrokenLabels;

    #[async_trait]
    impl LabelLookupProvider for BrokenLabels {
        async fn labels_for_codes(
            &self,
            _: LinkType,
            _: &BTreeSet<i64>,
        ) -> Result<HashMap<i64, String>> {
            Err(RelnetError::ProviderFailure("label table offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_enrich_never_fails() {
        let out = enrich(
            vec![edge(LinkType::Kinship, 1, 2, 75)],
            &BrokenLabels,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(out[0].label, "Kinship 75");
    }

    #[test]
    fn test_deduplicate_keeps_more_informative() {
        let bare = edge(LinkType::Kinship, 1, 2, 0);
        let mut rich = edge(LinkType::Kinship, 2, 1, 75);
        rich.label = "brother".to_string();
        let other = edge(LinkType::Association, 2, 3, 4);
        let out = deduplicate(vec![bare, other.clone(), rich.clone()]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], rich);
        assert_eq!(out[1], other);
    }

    #[test]
    fn test_deduplicate_tie_keeps_first() {
        let first = edge(LinkType::Kinship, 1, 2, 75);
        let second = edge(LinkType::Association, 2, 1, 9);
        let out = deduplicate(vec![first.clone(), second]);
        assert_eq!(out, vec![first]);
    }

    #[test]
    fn test_normalize_direction_records_swap() {
        let out = normalize_direction(vec![
            edge(LinkType::Kinship, 9, 3, 1),
            edge(LinkType::Kinship, 3, 9, 1),
        ]);
        assert_eq!((out[0].source, out[0].target), (3, 9));
        assert_eq!(out[0].metadata.get(SWAPPED_KEY).map(String::as_str), Some("true"));
        assert!(out[1].metadata.is_empty());
    }

    #[test]
    fn test_group_by_type() {
        let groups = group_by_type(&[
            edge(LinkType::Kinship, 1, 2, 1),
            edge(LinkType::Association, 2, 3, 1),
            edge(LinkType::Kinship, 3, 4, 1),
        ]);
        assert_eq!(groups[&LinkType::Kinship].len(), 2);
        assert_eq!(groups[&LinkType::Association].len(), 1);
    }
}
