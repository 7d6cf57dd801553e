//! SQLite-backed link and label store.

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, ToSql};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{LabelLookupProvider, LinkDiscoveryProvider};
use crate::db::{migrate, Db};
use crate::model::{EntityFilter, EntityId, EntitySummary, LinkType, TypedLink};
use crate::Result;

/// Table layout for one link family.
struct LinkTable {
    table: &'static str,
    code_column: &'static str,
    codes_table: &'static str,
}

fn link_table(link_type: LinkType) -> LinkTable {
    match link_type {
        LinkType::Kinship => LinkTable {
            table: "kinship_links",
            code_column: "kin_code",
            codes_table: "kinship_codes",
        },
        LinkType::Association => LinkTable {
            table: "association_links",
            code_column: "assoc_code",
            codes_table: "association_codes",
        },
    }
}

fn selected_types(include_kinship: bool, include_association: bool) -> Vec<LinkType> {
    let mut types = Vec::with_capacity(2);
    if include_kinship {
        types.push(LinkType::Kinship);
    }
    if include_association {
        types.push(LinkType::Association);
    }
    types
}

/// Ids bound per statement. Bundled SQLite allows at most 32766 variables and
/// the link queries bind each batch twice.
const MAX_BATCH: usize = 10_000;

/// Numbered placeholders `?1,...,?n`; the same list can be reused in one statement.
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(",")
}

/// Links of one family matching `clause`, which is built from the
/// placeholders of one batch. Rows come back with their table id.
fn query_links(
    conn: &Connection,
    link_type: LinkType,
    clause: &str,
    batch: &[EntityId],
) -> Result<Vec<(i64, TypedLink)>> {
    let t = link_table(link_type);
    let query = format!(
        "SELECT l.id, l.source_id, l.target_id, l.{code}, COALESCE(c.label, '') \
         FROM {table} l LEFT JOIN {codes} c ON c.code = l.{code} \
         WHERE {clause}",
        code = t.code_column,
        table = t.table,
        codes = t.codes_table,
        clause = clause,
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            TypedLink {
                source: row.get(1)?,
                target: row.get(2)?,
                link_type,
                link_code: row.get(3)?,
                label: row.get(4)?,
            },
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Run `query_links` per batch of `ids` for each family, keep the links
/// accepted by `keep`, and return them in table order within each family.
fn collect_links<F>(
    conn: &Connection,
    types: &[LinkType],
    ids: &[EntityId],
    clause_for: fn(&str) -> String,
    keep: F,
) -> Result<Vec<TypedLink>>
where
    F: Fn(&TypedLink) -> bool,
{
    let mut out = Vec::new();
    for link_type in types {
        let mut rows = Vec::new();
        for batch in ids.chunks(MAX_BATCH) {
            let clause = clause_for(&placeholders(batch.len()));
            rows.extend(
                query_links(conn, *link_type, &clause, batch)?
                    .into_iter()
                    .filter(|(_, link)| keep(link)),
            );
        }
        rows.sort_by_key(|(id, _)| *id);
        out.extend(rows.into_iter().map(|(_, link)| link));
    }
    Ok(out)
}

/// Ids in `batch` whose entity row passes `filter`.
fn filter_batch(
    conn: &Connection,
    batch: &[EntityId],
    filter: &EntityFilter,
) -> Result<Vec<EntityId>> {
    let mut query = format!(
        "SELECT id FROM entities WHERE id IN ({})",
        placeholders(batch.len())
    );
    let mut params: Vec<Box<dyn ToSql>> = batch
        .iter()
        .map(|id| Box::new(*id) as Box<dyn ToSql>)
        .collect();
    if let Some(min) = filter.index_year_min {
        params.push(Box::new(min));
        query.push_str(&format!(" AND index_year >= ?{}", params.len()));
    }
    if let Some(max) = filter.index_year_max {
        params.push(Box::new(max));
        query.push_str(&format!(" AND index_year <= ?{}", params.len()));
    }
    if let Some(female) = filter.female {
        params.push(Box::new(female));
        query.push_str(&format!(" AND female = ?{}", params.len()));
    }
    if let Some(dynasty) = filter.dynasty {
        params.push(Box::new(dynasty));
        query.push_str(&format!(" AND dynasty = ?{}", params.len()));
    }

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, EntityId>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Link discovery and label lookup over the relnet SQLite schema.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Db,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<usize> {
        self.db
            .with_connection(migrate::run_embedded_migrations)
            .await
    }

    pub async fn insert_entity(&self, entity: EntitySummary) -> Result<()> {
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO entities (id, name, index_year, female, dynasty) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
                     index_year = excluded.index_year, female = excluded.female, \
                     dynasty = excluded.dynasty",
                    params![
                        entity.id,
                        entity.name,
                        entity.index_year,
                        entity.female,
                        entity.dynasty
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn insert_link(&self, link: TypedLink) -> Result<()> {
        self.db
            .with_connection(move |conn| {
                let t = link_table(link.link_type);
                conn.execute(
                    &format!(
                        "INSERT INTO {} (source_id, target_id, {}) VALUES (?1, ?2, ?3)",
                        t.table, t.code_column
                    ),
                    params![link.source, link.target, link.link_code],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn insert_code_label(
        &self,
        link_type: LinkType,
        code: i64,
        label: &str,
    ) -> Result<()> {
        let label = label.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {} (code, label) VALUES (?1, ?2)",
                        link_table(link_type).codes_table
                    ),
                    params![code, label],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl LinkDiscoveryProvider for SqliteStore {
    async fn links_within_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<Vec<TypedLink>> {
        let types = selected_types(include_kinship, include_association);
        if ids.is_empty() || types.is_empty() {
            return Ok(Vec::new());
        }
        let group = ids.clone();
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        self.db
            .with_connection(move |conn| {
                // Each link is fetched once, with the batch holding its source.
                collect_links(
                    conn,
                    &types,
                    &ids,
                    |p| format!("l.source_id IN ({p})"),
                    |link| group.contains(&link.target),
                )
            })
            .await
    }

    async fn links_from_group(
        &self,
        ids: &BTreeSet<EntityId>,
        include_kinship: bool,
        include_association: bool,
    ) -> Result<BTreeMap<EntityId, Vec<TypedLink>>> {
        let types = selected_types(include_kinship, include_association);
        if ids.is_empty() || types.is_empty() {
            return Ok(BTreeMap::new());
        }
        let group = ids.clone();
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        let links = self
            .db
            .with_connection({
                let group = group.clone();
                move |conn| {
                    // A link with exactly one member endpoint only matches the
                    // batch holding that endpoint.
                    collect_links(
                        conn,
                        &types,
                        &ids,
                        |p| format!("l.source_id IN ({p}) OR l.target_id IN ({p})"),
                        |link| group.contains(&link.source) != group.contains(&link.target),
                    )
                }
            })
            .await?;

        let mut grouped: BTreeMap<EntityId, Vec<TypedLink>> = BTreeMap::new();
        for link in links {
            let anchor = if group.contains(&link.source) {
                link.source
            } else {
                link.target
            };
            grouped.entry(anchor).or_default().push(link);
        }
        Ok(grouped)
    }

    async fn load_entities(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<BTreeMap<EntityId, EntitySummary>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        self.db
            .with_connection(move |conn| {
                let mut out = BTreeMap::new();
                for batch in ids.chunks(MAX_BATCH) {
                    let query = format!(
                        "SELECT id, name, index_year, female, dynasty FROM entities \
                         WHERE id IN ({})",
                        placeholders(batch.len())
                    );
                    let mut stmt = conn.prepare(&query)?;
                    let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                        Ok(EntitySummary {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            index_year: row.get(2)?,
                            female: row.get(3)?,
                            dynasty: row.get(4)?,
                        })
                    })?;
                    for row in rows {
                        let entity = row?;
                        out.insert(entity.id, entity);
                    }
                }
                Ok(out)
            })
            .await
    }

    async fn filter_entities(
        &self,
        ids: &BTreeSet<EntityId>,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        let filter = filter.clone();
        self.db
            .with_connection(move |conn| {
                let mut out = Vec::new();
                for batch in ids.chunks(MAX_BATCH) {
                    out.extend(filter_batch(conn, batch, &filter)?);
                }
                out.sort_unstable();
                Ok(out)
            })
            .await
    }
}

#[async_trait]
impl LabelLookupProvider for SqliteStore {
    async fn labels_for_codes(
        &self,
        link_type: LinkType,
        codes: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, String>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let codes: Vec<i64> = codes.iter().copied().collect();
        self.db
            .with_connection(move |conn| {
                let mut out = HashMap::new();
                for batch in codes.chunks(MAX_BATCH) {
                    let query = format!(
                        "SELECT code, label FROM {} WHERE code IN ({})",
                        link_table(link_type).codes_table,
                        placeholders(batch.len())
                    );
                    let mut stmt = conn.prepare(&query)?;
                    let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?;
                    for row in rows {
                        let (code, label) = row?;
                        out.insert(code, label);
                    }
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(Db::new(temp_dir.path().join("relnet.db")));
        store.migrate().await.unwrap();

        store
            .insert_entity(
                EntitySummary::new(1762, "Su Shi")
                    .with_index_year(1096)
                    .with_dynasty(15),
            )
            .await
            .unwrap();
        store
            .insert_entity(
                EntitySummary::new(1760, "Su Zhe")
                    .with_index_year(1099)
                    .with_dynasty(15),
            )
            .await
            .unwrap();
        store
            .insert_entity(
                EntitySummary::new(1758, "Su Xun")
                    .with_index_year(1069)
                    .with_dynasty(15),
            )
            .await
            .unwrap();
        store
            .insert_entity(
                EntitySummary::new(3767, "Ouyang Xiu")
                    .with_index_year(1067)
                    .with_dynasty(15),
            )
            .await
            .unwrap();

        store.insert_link(TypedLink::new(LinkType::Kinship, 1762, 1760, 75)).await.unwrap();
        store.insert_link(TypedLink::new(LinkType::Kinship, 1762, 1758, 1)).await.unwrap();
        store.insert_link(TypedLink::new(LinkType::Kinship, 1760, 1758, 1)).await.unwrap();
        store.insert_link(TypedLink::new(LinkType::Association, 3767, 1762, 22)).await.unwrap();
        store.insert_code_label(LinkType::Kinship, 1, "father").await.unwrap();
        store.insert_code_label(LinkType::Association, 22, "examiner of").await.unwrap();
        (store, temp_dir)
    }

    fn set(ids: &[EntityId]) -> BTreeSet<EntityId> {
        ids.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_links_within_group_joins_labels() {
        let (store, _temp) = setup_store().await;
        let links = store
            .links_within_group(&set(&[1762, 1760]), true, true)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Kinship);
        assert_eq!(links[0].link_code, 75);
        // No label row for code 75
        assert_eq!(links[0].label, "");
    }

    #[tokio::test]
    async fn test_links_from_group_excludes_internal_links() {
        let (store, _temp) = setup_store().await;
        let grouped = store
            .links_from_group(&set(&[1762, 1760]), true, true)
            .await
            .unwrap();
        assert_eq!(grouped[&1762].len(), 2); // father + examiner
        assert_eq!(grouped[&1760].len(), 1); // father
        assert!(grouped
            .values()
            .flatten()
            .all(|l| l.pair_key() != (1760, 1762)));
        let father = grouped[&1760].iter().find(|l| l.link_code == 1).unwrap();
        assert_eq!(father.label, "father");
    }

    #[tokio::test]
    async fn test_links_from_group_type_toggle() {
        let (store, _temp) = setup_store().await;
        let grouped = store
            .links_from_group(&set(&[1762]), false, true)
            .await
            .unwrap();
        assert_eq!(grouped[&1762].len(), 1);
        assert_eq!(grouped[&1762][0].link_type, LinkType::Association);
        assert!(store
            .links_from_group(&set(&[1762]), false, false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_load_and_filter_entities() {
        let (store, _temp) = setup_store().await;
        let loaded = store.load_entities(&set(&[1762, 99999])).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&1762].name, "Su Shi");
        assert_eq!(loaded[&1762].index_year, Some(1096));

        let filter = EntityFilter {
            index_year_min: Some(1068),
            ..Default::default()
        };
        let kept = store
            .filter_entities(&set(&[1762, 1760, 1758, 3767]), &filter)
            .await
            .unwrap();
        assert_eq!(kept, vec![1758, 1760, 1762]);
    }

    #[tokio::test]
    async fn test_labels_for_codes() {
        let (store, _temp) = setup_store().await;
        let labels = store
            .labels_for_codes(LinkType::Kinship, &set(&[1, 75]))
            .await
            .unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[&1], "father");
    }

    /// Real ids straddle a batch boundary and the group exceeds SQLite's
    /// bound-variable limit.
    fn oversized(real: &[EntityId]) -> BTreeSet<EntityId> {
        let low = -(MAX_BATCH as EntityId - 1)..0;
        let high = 4000..35_000;
        low.chain(real.iter().copied()).chain(high).collect()
    }

    #[tokio::test]
    async fn test_large_groups_are_batched() {
        let (store, _temp) = setup_store().await;

        let all = oversized(&[1758, 1760, 1762, 3767]);
        assert!(all.len() > 32_766);
        let within = store.links_within_group(&all, true, true).await.unwrap();
        assert_eq!(within.len(), 4);
        let mut pairs: Vec<_> = within.iter().map(|l| l.pair_key()).collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 4);

        let grouped = store
            .links_from_group(&oversized(&[1760, 1762]), true, true)
            .await
            .unwrap();
        assert_eq!(grouped[&1762].len(), 2);
        assert_eq!(grouped[&1760].len(), 1);
        assert_eq!(grouped.values().flatten().count(), 3);

        let loaded = store.load_entities(&all).await.unwrap();
        assert_eq!(loaded.len(), 4);
        let kept = store
            .filter_entities(&all, &EntityFilter { dynasty: Some(15), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(kept, vec![1758, 1760, 1762, 3767]);
    }
}
