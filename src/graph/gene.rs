//! Gene identity primitives.
//!
//! Genes carry no unique key: a gene can first be seen under an accession, a
//! numeric id or a symbol. `upsert_gene` matches on whichever identifier the
//! caller keys by and never looks at the others, so two records for the same
//! gene under different keys produce two rows until consolidation merges them.

use rusqlite::{Connection, OptionalExtension, params};

use crate::graph::model::{GeneRow, IdSpace};
use crate::graph::{decode_json_list, encode_json_list, now_timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneAttributes {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub accession: Option<String>,
    pub numeric_id: Option<String>,
    pub taxon: Option<String>,
    pub db_source: Option<String>,
}

impl GeneAttributes {
    fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.name.is_none()
            && self.accession.is_none()
            && self.numeric_id.is_none()
            && self.taxon.is_none()
            && self.db_source.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneUpsert {
    pub key: IdSpace,
    pub value: String,
    /// Overwritten on every match.
    pub always: GeneAttributes,
    /// Applied only when the row is created.
    pub on_create: GeneAttributes,
    /// Applied whenever the stored value is missing.
    pub fill: GeneAttributes,
    pub synonyms: Vec<String>,
    pub source_file: String,
}

impl GeneUpsert {
    pub fn keyed(key: IdSpace, value: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            always: GeneAttributes::default(),
            on_create: GeneAttributes::default(),
            fill: GeneAttributes::default(),
            synonyms: Vec::new(),
            source_file: source_file.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneUpsertOutcome {
    pub gene_id: i64,
    pub created: bool,
}

pub fn find_gene_by(conn: &Connection, key: IdSpace, value: &str) -> rusqlite::Result<Option<i64>> {
    let sql = format!(
        "SELECT id FROM genes WHERE {} = ?1 ORDER BY id ASC LIMIT 1",
        key.column()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.query_row(params![value], |row| row.get(0)).optional()
}

pub fn upsert_gene(conn: &Connection, upsert: &GeneUpsert) -> rusqlite::Result<GeneUpsertOutcome> {
    let value = upsert.value.trim();
    if value.is_empty() {
        return Err(rusqlite::Error::InvalidParameterName(format!(
            "gene {} must not be empty",
            upsert.key.as_str()
        )));
    }

    let now = now_timestamp();
    if let Some(gene_id) = find_gene_by(conn, upsert.key, value)? {
        let Some(mut gene) = load_gene(conn, gene_id)? else {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        };
        apply_always(&mut gene, &upsert.always);
        apply_fill(&mut gene, &upsert.fill);
        merge_unique(&mut gene.synonyms, &upsert.synonyms);
        merge_unique(&mut gene.source_files, std::slice::from_ref(&upsert.source_file));
        store_gene(conn, &gene, &now)?;
        return Ok(GeneUpsertOutcome {
            gene_id,
            created: false,
        });
    }

    let mut gene = GeneRow {
        id_type: upsert.key.as_str().to_string(),
        ..GeneRow::default()
    };
    set_identifier(&mut gene, upsert.key, value.to_string());
    apply_always(&mut gene, &upsert.on_create);
    apply_always(&mut gene, &upsert.always);
    apply_fill(&mut gene, &upsert.fill);
    merge_unique(&mut gene.synonyms, &upsert.synonyms);
    merge_unique(&mut gene.source_files, std::slice::from_ref(&upsert.source_file));

    conn.execute(
        "INSERT INTO genes (
            symbol, name, accession, numeric_id, taxon, db_source, id_type,
            synonyms, source_files, consolidated, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10)",
        params![
            gene.symbol,
            gene.name,
            gene.accession,
            gene.numeric_id,
            gene.taxon,
            gene.db_source,
            gene.id_type,
            encode_json_list(&gene.synonyms),
            encode_json_list(&gene.source_files),
            now
        ],
    )?;
    Ok(GeneUpsertOutcome {
        gene_id: conn.last_insert_rowid(),
        created: true,
    })
}

pub fn load_gene(conn: &Connection, id: i64) -> rusqlite::Result<Option<GeneRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, symbol, name, accession, numeric_id, taxon, db_source, id_type,
                synonyms, source_files, consolidated
         FROM genes WHERE id = ?1",
    )?;
    stmt.query_row(params![id], |row| {
        Ok(GeneRow {
            id: row.get(0)?,
            symbol: row.get(1)?,
            name: row.get(2)?,
            accession: row.get(3)?,
            numeric_id: row.get(4)?,
            taxon: row.get(5)?,
            db_source: row.get(6)?,
            id_type: row.get(7)?,
            synonyms: decode_json_list(&row.get::<_, String>(8)?),
            source_files: decode_json_list(&row.get::<_, String>(9)?),
            consolidated: row.get::<_, i64>(10)? != 0,
        })
    })
    .optional()
}

pub(crate) fn store_gene(conn: &Connection, gene: &GeneRow, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE genes SET
            symbol = ?2, name = ?3, accession = ?4, numeric_id = ?5, taxon = ?6,
            db_source = ?7, synonyms = ?8, source_files = ?9, consolidated = ?10,
            updated_at = ?11
         WHERE id = ?1",
        params![
            gene.id,
            gene.symbol,
            gene.name,
            gene.accession,
            gene.numeric_id,
            gene.taxon,
            gene.db_source,
            encode_json_list(&gene.synonyms),
            encode_json_list(&gene.source_files),
            if gene.consolidated { 1_i64 } else { 0_i64 },
            now
        ],
    )?;
    Ok(())
}

fn set_identifier(gene: &mut GeneRow, key: IdSpace, value: String) {
    match key {
        IdSpace::NumericId => gene.numeric_id = Some(value),
        IdSpace::Symbol => gene.symbol = Some(value),
        IdSpace::Accession => gene.accession = Some(value),
    }
}

fn apply_always(gene: &mut GeneRow, attrs: &GeneAttributes) {
    if attrs.is_empty() {
        return;
    }
    overwrite(&mut gene.symbol, &attrs.symbol);
    overwrite(&mut gene.name, &attrs.name);
    overwrite(&mut gene.accession, &attrs.accession);
    overwrite(&mut gene.numeric_id, &attrs.numeric_id);
    overwrite(&mut gene.taxon, &attrs.taxon);
    overwrite(&mut gene.db_source, &attrs.db_source);
}

pub(crate) fn apply_fill(gene: &mut GeneRow, attrs: &GeneAttributes) {
    if attrs.is_empty() {
        return;
    }
    fill_missing(&mut gene.symbol, attrs.symbol.as_deref());
    fill_missing(&mut gene.name, attrs.name.as_deref());
    fill_missing(&mut gene.accession, attrs.accession.as_deref());
    fill_missing(&mut gene.numeric_id, attrs.numeric_id.as_deref());
    fill_missing(&mut gene.taxon, attrs.taxon.as_deref());
    fill_missing(&mut gene.db_source, attrs.db_source.as_deref());
}

fn overwrite(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().map(str::trim)
        && !value.is_empty()
    {
        *slot = Some(value.to_string());
    }
}

/// First non-empty value wins; an existing value is never replaced.
pub(crate) fn fill_missing(slot: &mut Option<String>, incoming: Option<&str>) {
    let missing = slot.as_deref().is_none_or(|value| value.trim().is_empty());
    if missing
        && let Some(value) = incoming.map(str::trim)
        && !value.is_empty()
    {
        *slot = Some(value.to_string());
    }
}

/// Appends values not already present, keeping existing order first.
pub(crate) fn merge_unique(existing: &mut Vec<String>, incoming: &[String]) -> bool {
    let mut changed = false;
    for value in incoming {
        let value = value.trim();
        if value.is_empty() || existing.iter().any(|current| current == value) {
            continue;
        }
        existing.push(value.to_string());
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;

    #[test]
    fn upsert_matches_only_on_its_own_key() {
        let store = GraphStore::open_in_memory().expect("store");
        let mut by_numeric = GeneUpsert::keyed(IdSpace::NumericId, "7157", "collapsed_go.entrez");
        by_numeric.on_create.symbol = Some("TP53".to_string());
        let first = upsert_gene(store.conn(), &by_numeric).expect("numeric upsert");
        assert!(first.created);

        let by_accession = GeneUpsert::keyed(IdSpace::Accession, "P04637", "goa_human.gaf.gz");
        let second = upsert_gene(store.conn(), &by_accession).expect("accession upsert");
        assert!(second.created);
        assert_ne!(first.gene_id, second.gene_id);

        let again = upsert_gene(store.conn(), &by_numeric).expect("numeric again");
        assert!(!again.created);
        assert_eq!(again.gene_id, first.gene_id);
        assert_eq!(store.gene_count().expect("count"), 2);
    }

    #[test]
    fn always_overwrites_on_create_applies_once_and_fill_never_replaces() {
        let store = GraphStore::open_in_memory().expect("store");
        let mut upsert = GeneUpsert::keyed(IdSpace::Accession, "P04637", "a.gaf");
        upsert.always.name = Some("Cellular tumor antigen p53".to_string());
        upsert.on_create.taxon = Some("taxon:9606".to_string());
        upsert.synonyms = vec!["P53".to_string()];
        let created = upsert_gene(store.conn(), &upsert).expect("create");

        let mut update = GeneUpsert::keyed(IdSpace::Accession, "P04637", "b.gaf");
        update.always.name = Some("p53".to_string());
        update.on_create.taxon = Some("taxon:10090".to_string());
        update.fill.numeric_id = Some("7157".to_string());
        update.synonyms = vec!["P53".to_string(), "LFS1".to_string()];
        upsert_gene(store.conn(), &update).expect("update");

        let mut refill = GeneUpsert::keyed(IdSpace::Accession, "P04637", "b.gaf");
        refill.fill.numeric_id = Some("9999".to_string());
        upsert_gene(store.conn(), &refill).expect("refill");

        let gene = store.gene(created.gene_id).expect("load").expect("gene");
        assert_eq!(gene.name.as_deref(), Some("p53"));
        assert_eq!(gene.taxon.as_deref(), Some("taxon:9606"));
        assert_eq!(gene.numeric_id.as_deref(), Some("7157"));
        assert_eq!(gene.synonyms, vec!["P53".to_string(), "LFS1".to_string()]);
        assert_eq!(gene.source_files, vec!["a.gaf".to_string(), "b.gaf".to_string()]);
        assert_eq!(gene.id_type, "accession");
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = GraphStore::open_in_memory().expect("store");
        let upsert = GeneUpsert::keyed(IdSpace::Symbol, "  ", "x");
        assert!(upsert_gene(store.conn(), &upsert).is_err());
    }
}
