//! Gene identity consolidation.
//!
//! Genes arrive keyed by whichever identifier their source carries, so one
//! gene can exist as several rows. This pass groups rows that share a value on
//! a reconciling key and folds every later row into the first-created one.

use std::collections::HashSet;

use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::gene::{GeneAttributes, apply_fill, load_gene, merge_unique, store_gene};
use crate::graph::model::IdSpace;
use crate::graph::{GraphStore, now_timestamp};

/// Identifier column two rows must agree on to be the same gene.
pub type ReconcileKey = IdSpace;

pub const DEFAULT_RECONCILE_KEYS: [ReconcileKey; 1] = [IdSpace::Symbol];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConsolidationStats {
    pub keys: Vec<ReconcileKey>,
    pub groups: u64,
    pub merged: u64,
    pub annotations_moved: u64,
    pub annotations_dropped: u64,
    pub entity_edges_moved: u64,
    pub entity_edges_dropped: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
}

impl ConsolidationStats {
    fn absorb(&mut self, merge: MergeCounts) {
        self.merged += 1;
        self.annotations_moved += merge.annotations_moved;
        self.annotations_dropped += merge.annotations_dropped;
        self.entity_edges_moved += merge.entity_edges_moved;
        self.entity_edges_dropped += merge.entity_edges_dropped;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MergeCounts {
    annotations_moved: u64,
    annotations_dropped: u64,
    entity_edges_moved: u64,
    entity_edges_dropped: u64,
}

/// Merges duplicate genes on each key in order. Store errors while finding
/// groups abort the pass; errors inside a single merge are counted and the
/// pass moves on to the next pair.
pub fn consolidate_genes(
    store: &GraphStore,
    keys: &[ReconcileKey],
) -> rusqlite::Result<ConsolidationStats> {
    let mut stats = ConsolidationStats {
        keys: keys.to_vec(),
        ..ConsolidationStats::default()
    };

    for key in keys {
        let groups = duplicate_groups(store.conn(), *key)?;
        debug!(key = key.as_str(), groups = groups.len(), "duplicate groups found");
        for (value, ids) in groups {
            stats.groups += 1;
            let Some((&canonical, redundant)) = ids.split_first() else {
                continue;
            };
            for &duplicate in redundant {
                match merge_pair(store.conn(), canonical, duplicate) {
                    Ok(Some(merge)) => stats.absorb(merge),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(
                            key = key.as_str(),
                            value = %value,
                            canonical,
                            duplicate,
                            error = %err,
                            "gene merge failed"
                        );
                        stats.errors += 1;
                        stats
                            .error_messages
                            .push(format!("{}={value} ({duplicate} into {canonical}): {err}", key.as_str()));
                    }
                }
            }
        }
    }

    info!(
        groups = stats.groups,
        merged = stats.merged,
        annotations_moved = stats.annotations_moved,
        errors = stats.errors,
        "gene consolidation complete"
    );
    Ok(stats)
}

/// Gene ids sharing each non-empty value of `key`, lowest rowid first.
fn duplicate_groups(conn: &Connection, key: ReconcileKey) -> rusqlite::Result<Vec<(String, Vec<i64>)>> {
    let column = key.column();
    let sql = format!(
        "SELECT {column}, id FROM genes
         WHERE {column} IN (
             SELECT {column} FROM genes
             WHERE {column} IS NOT NULL AND TRIM({column}) <> ''
             GROUP BY {column} HAVING COUNT(*) > 1
         )
         ORDER BY {column} ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut groups: Vec<(String, Vec<i64>)> = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        let id: i64 = row.get(1)?;
        match groups.last_mut() {
            Some((current, ids)) if *current == value => ids.push(id),
            _ => groups.push((value, vec![id])),
        }
    }
    Ok(groups)
}

/// Folds `duplicate` into `canonical` in one transaction. Returns `None` when
/// either row disappeared, e.g. merged away under an earlier key.
fn merge_pair(conn: &Connection, canonical: i64, duplicate: i64) -> rusqlite::Result<Option<MergeCounts>> {
    let tx = conn.unchecked_transaction()?;
    let (Some(mut keep), Some(gone)) = (load_gene(&tx, canonical)?, load_gene(&tx, duplicate)?) else {
        return Ok(None);
    };

    apply_fill(
        &mut keep,
        &GeneAttributes {
            symbol: gone.symbol.clone(),
            name: gone.name.clone(),
            accession: gone.accession.clone(),
            numeric_id: gone.numeric_id.clone(),
            taxon: gone.taxon.clone(),
            db_source: gone.db_source.clone(),
        },
    );
    merge_unique(&mut keep.synonyms, &gone.synonyms);
    merge_unique(&mut keep.source_files, &gone.source_files);
    keep.consolidated = true;
    store_gene(&tx, &keep, &now_timestamp())?;

    let mut counts = MergeCounts::default();

    // Term and source file pairs the canonical gene held before this merge.
    let held: HashSet<(String, String)> = {
        let mut stmt = tx.prepare_cached("SELECT term_id, source_file FROM annotations WHERE gene_id = ?1")?;
        stmt.query_map(params![canonical], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?
    };
    let incoming: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare_cached(
            "SELECT rowid, term_id, source_file FROM annotations WHERE gene_id = ?1 ORDER BY rowid",
        )?;
        stmt.query_map(params![duplicate], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?
    };
    for (rowid, term_id, source_file) in incoming {
        if held.contains(&(term_id, source_file)) {
            counts.annotations_dropped += 1;
            continue;
        }
        let moved = tx.execute(
            "UPDATE OR IGNORE annotations SET gene_id = ?1 WHERE rowid = ?2",
            params![canonical, rowid],
        )?;
        if moved > 0 {
            counts.annotations_moved += 1;
        } else {
            counts.annotations_dropped += 1;
        }
    }

    let moved_edges = tx.execute(
        "UPDATE OR IGNORE gene_entity_edges SET gene_id = ?1 WHERE gene_id = ?2",
        params![canonical, duplicate],
    )?;
    counts.entity_edges_moved = moved_edges as u64;

    tx.execute("DELETE FROM annotations WHERE gene_id = ?1", params![duplicate])?;
    let dropped_edges = tx.execute("DELETE FROM gene_entity_edges WHERE gene_id = ?1", params![duplicate])?;
    counts.entity_edges_dropped = dropped_edges as u64;
    tx.execute("DELETE FROM genes WHERE id = ?1", params![duplicate])?;
    tx.commit()?;

    debug!(canonical, duplicate, "genes merged");
    Ok(Some(counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::gene::{GeneUpsert, upsert_gene};

    fn seed_term(store: &GraphStore, id: &str) {
        store
            .conn()
            .execute(
                "INSERT INTO terms (id, name, namespace, source_file, import_timestamp)
                 VALUES (?1, ?1, 'biological_process', 'go-basic.obo', 't')",
                params![id],
            )
            .expect("term");
    }

    fn annotate(store: &GraphStore, gene_id: i64, term: &str, evidence: &str, source_file: &str) {
        store
            .conn()
            .execute(
                "INSERT INTO annotations (gene_id, term_id, evidence_code, qualifier, source_file, imported_at)
                 VALUES (?1, ?2, ?3, 'involved_in', ?4, 't')",
                params![gene_id, term, evidence, source_file],
            )
            .expect("annotation");
    }

    fn link_entity(store: &GraphStore, gene_id: i64, name: &str, source_file: &str) {
        store
            .conn()
            .execute(
                "INSERT INTO gene_entity_edges (gene_id, entity_kind, entity_name, relation, source_file)
                 VALUES (?1, 'disease', ?2, 'associated_with_disease', ?3)",
                params![gene_id, name, source_file],
            )
            .expect("entity edge");
    }

    /// A numeric-id record, then a symbol record, then a source that knows
    /// both identifiers for the numeric-id gene. No pipeline stage writes
    /// that bridge record: collapsed tables carry one identifier each, so the
    /// two genes only merge once some source fills in both.
    fn numeric_then_symbol(store: &GraphStore) -> (i64, i64) {
        let numeric = upsert_gene(
            store.conn(),
            &GeneUpsert::keyed(IdSpace::NumericId, "7157", "collapsed_go.entrez"),
        )
        .expect("numeric");
        let symbol = upsert_gene(
            store.conn(),
            &GeneUpsert::keyed(IdSpace::Symbol, "TP53", "collapsed_go.symbol"),
        )
        .expect("symbol");
        let mut bridge = GeneUpsert::keyed(IdSpace::NumericId, "7157", "collapsed_go.entrez");
        bridge.fill.symbol = Some("TP53".to_string());
        upsert_gene(store.conn(), &bridge).expect("bridge");
        (numeric.gene_id, symbol.gene_id)
    }

    #[test]
    fn numeric_and_symbol_records_merge_into_one_gene() {
        let store = GraphStore::open_in_memory().expect("store");
        let (numeric, symbol) = numeric_then_symbol(&store);
        assert_eq!(store.gene_count().expect("count"), 2);

        let stats = consolidate_genes(&store, &DEFAULT_RECONCILE_KEYS).expect("consolidate");
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(store.gene_count().expect("count"), 1);

        let gene = store.gene(numeric).expect("load").expect("canonical survives");
        assert_eq!(gene.numeric_id.as_deref(), Some("7157"));
        assert_eq!(gene.symbol.as_deref(), Some("TP53"));
        assert!(gene.consolidated);
        assert_eq!(
            gene.source_files,
            vec!["collapsed_go.entrez".to_string(), "collapsed_go.symbol".to_string()]
        );
        assert!(store.gene(symbol).expect("load").is_none());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let store = GraphStore::open_in_memory().expect("store");
        numeric_then_symbol(&store);
        consolidate_genes(&store, &DEFAULT_RECONCILE_KEYS).expect("first");
        let again = consolidate_genes(&store, &DEFAULT_RECONCILE_KEYS).expect("second");
        assert_eq!(again.groups, 0);
        assert_eq!(again.merged, 0);
        assert_eq!(store.gene_count().expect("count"), 1);
    }

    #[test]
    fn edges_move_unless_canonical_already_has_same_provenance() {
        let store = GraphStore::open_in_memory().expect("store");
        seed_term(&store, "GO:1");
        seed_term(&store, "GO:2");
        let (canonical, duplicate) = numeric_then_symbol(&store);

        annotate(&store, canonical, "GO:1", "IDA", "goa_human.gaf.gz");
        annotate(&store, duplicate, "GO:1", "IEA", "goa_human.gaf.gz");
        annotate(&store, duplicate, "GO:1", "COLLAPSED", "collapsed_go.symbol");
        annotate(&store, duplicate, "GO:2", "COLLAPSED", "collapsed_go.symbol");
        link_entity(&store, canonical, "asthma", "disease.tsv");
        link_entity(&store, duplicate, "asthma", "disease.tsv");
        link_entity(&store, duplicate, "gout", "disease.tsv");

        let stats = consolidate_genes(&store, &DEFAULT_RECONCILE_KEYS).expect("consolidate");
        assert_eq!(stats.annotations_moved, 2);
        assert_eq!(stats.annotations_dropped, 1);
        assert_eq!(stats.entity_edges_moved, 1);
        assert_eq!(stats.entity_edges_dropped, 1);

        let annotations = store.annotations_for_gene(canonical).expect("annotations");
        assert_eq!(annotations.len(), 3);
        assert!(annotations.iter().all(|edge| edge.gene_id == canonical));
        let edges = store
            .count(
                "SELECT COUNT(*) FROM gene_entity_edges WHERE gene_id = ?1",
                params![canonical],
            )
            .expect("count");
        assert_eq!(edges, 2);
        assert_eq!(store.annotation_count().expect("count"), 3);
    }

    #[test]
    fn configured_keys_merge_in_order() {
        let store = GraphStore::open_in_memory().expect("store");
        let mut first = GeneUpsert::keyed(IdSpace::Accession, "P04637", "goa_human.gaf.gz");
        first.always.symbol = Some("TP53".to_string());
        upsert_gene(store.conn(), &first).expect("accession gene");
        upsert_gene(
            store.conn(),
            &GeneUpsert::keyed(IdSpace::NumericId, "7157", "collapsed_go.entrez"),
        )
        .expect("numeric gene");
        let mut third = GeneUpsert::keyed(IdSpace::Accession, "P04637", "collapsed_go.uniprot");
        third.fill.numeric_id = Some("7157".to_string());
        // Keyed by accession: matches the first gene, so no new row.
        upsert_gene(store.conn(), &third).expect("fill");
        assert_eq!(store.gene_count().expect("count"), 2);

        let symbol_only = consolidate_genes(&store, &DEFAULT_RECONCILE_KEYS).expect("symbol pass");
        assert_eq!(symbol_only.merged, 0);

        let stats = consolidate_genes(&store, &[IdSpace::Symbol, IdSpace::NumericId]).expect("both");
        assert_eq!(stats.merged, 1);
        let genes = store.genes().expect("genes");
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].accession.as_deref(), Some("P04637"));
        assert_eq!(genes[0].numeric_id.as_deref(), Some("7157"));
    }
}
