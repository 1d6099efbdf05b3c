use rusqlite::{Connection, Transaction, params};
use serde::Serialize;

use crate::graph::model::{HierarchyKind, Partition, RelationKind, encode_hierarchy_kind};
use crate::graph::{GraphStore, now_timestamp};
use crate::ingest::{Counters, MISSING_TERMS, UpsertOp};
use crate::source::reference::EnrichedTerm;
use crate::source::tables::HierarchyRow;

/// Child-to-parent relation taken from a term's own stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StanzaRelation {
    pub child: String,
    pub parent: String,
    pub kind: RelationKind,
}

pub fn stanza_relations_for(terms: &[EnrichedTerm]) -> Vec<StanzaRelation> {
    terms
        .iter()
        .flat_map(|record| {
            record.term.relations.iter().map(|relation| StanzaRelation {
                child: record.term.id.clone(),
                parent: relation.target.clone(),
                kind: relation.kind.clone(),
            })
        })
        .collect()
}

pub struct StanzaRelationUpsert {
    pub partition: Partition,
    pub source_file: String,
}

impl UpsertOp for StanzaRelationUpsert {
    type Record = StanzaRelation;

    fn stage(&self) -> String {
        format!("stanza_relations:{}", self.partition.namespace())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[StanzaRelation],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let now = now_timestamp();
        for relation in batch {
            if !both_terms_exist(tx, &relation.child, &relation.parent)? {
                counters.incr(MISSING_TERMS);
                continue;
            }
            let kind = HierarchyKind::Relation(relation.kind.clone());
            let inserted = insert_edge(
                tx,
                &relation.child,
                &relation.parent,
                &kind,
                &self.source_file,
                false,
                &now,
            )?;
            counters.incr(if inserted { "created" } else { "existing" });
        }
        Ok(())
    }
}

/// Rows of the hierarchy table. A relation already asserted by another file
/// is marked cross-validated instead of duplicated.
pub struct HierarchyTableUpsert {
    pub partition: Partition,
    pub source_file: String,
}

impl UpsertOp for HierarchyTableUpsert {
    type Record = HierarchyRow;

    fn stage(&self) -> String {
        format!("hierarchy:{}", self.partition.namespace())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[HierarchyRow],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let now = now_timestamp();
        for row in batch {
            if !both_terms_exist(tx, &row.child, &row.parent)? {
                counters.incr(MISSING_TERMS);
                continue;
            }
            let kind = HierarchyKind::Relation(row.kind.clone());
            let (stored_kind, raw_label) = encode_hierarchy_kind(&kind);

            let mut own = tx.prepare_cached(
                "SELECT 1 FROM hierarchy_edges
                 WHERE child = ?1 AND parent = ?2 AND kind = ?3 AND raw_label = ?4 AND source_file = ?5",
            )?;
            if own.exists(params![row.child, row.parent, stored_kind, raw_label, self.source_file])? {
                counters.incr("existing");
                continue;
            }

            let confirmed = tx.execute(
                "UPDATE hierarchy_edges SET cross_validated = 1, validated_at = ?5
                 WHERE child = ?1 AND parent = ?2 AND kind = ?3 AND raw_label = ?4",
                params![row.child, row.parent, stored_kind, raw_label, now],
            )?;
            if confirmed > 0 {
                counters.incr("cross_validated");
                continue;
            }

            insert_edge(tx, &row.child, &row.parent, &kind, &self.source_file, false, &now)?;
            counters.incr("created");
        }
        Ok(())
    }
}

pub(crate) fn both_terms_exist(conn: &Connection, child: &str, parent: &str) -> rusqlite::Result<bool> {
    Ok(GraphStore::term_exists(conn, child)? && GraphStore::term_exists(conn, parent)?)
}

/// Inserts a hierarchy edge unless the same `(child, parent, kind, file)` exists.
pub(crate) fn insert_edge(
    conn: &Connection,
    child: &str,
    parent: &str,
    kind: &HierarchyKind,
    source_file: &str,
    cross_validated: bool,
    now: &str,
) -> rusqlite::Result<bool> {
    let (stored_kind, raw_label) = encode_hierarchy_kind(kind);
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO hierarchy_edges (
            child, parent, kind, raw_label, source_file, cross_validated, created_at, validated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CASE WHEN ?6 = 1 THEN ?7 END)",
    )?;
    let changed = stmt.execute(params![
        child,
        parent,
        stored_kind,
        raw_label,
        source_file,
        cross_validated as i64,
        now
    ])?;
    Ok(changed > 0)
}
