use rusqlite::{Connection, Transaction, params};

use crate::graph::GraphStore;
use crate::graph::gene::{GeneUpsert, upsert_gene};
use crate::graph::model::{IdSpace, Partition};
use crate::ingest::{Counters, MISSING_TERMS, UpsertOp};
use crate::source::gaf::AnnotationRecord;

/// Annotation rows keyed by accession: upserts the gene, then the gene-to-term
/// edge. Duplicate `(gene, term, evidence, qualifier, file)` edges are ignored.
pub struct AnnotationUpsert {
    pub partition: Partition,
    pub source_file: String,
    pub imported_at: String,
}

impl UpsertOp for AnnotationUpsert {
    type Record = AnnotationRecord;

    fn stage(&self) -> String {
        format!("annotations:{}", self.partition.namespace())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[AnnotationRecord],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        for record in batch {
            if !GraphStore::term_exists(tx, &record.term_id)? {
                counters.incr(MISSING_TERMS);
                continue;
            }

            let mut gene = GeneUpsert::keyed(IdSpace::Accession, &record.accession, &self.source_file);
            gene.always.symbol = non_empty(&record.symbol);
            gene.always.name = non_empty(&record.object_name);
            gene.always.db_source = non_empty(&record.db);
            gene.always.taxon = non_empty(&record.taxon);
            gene.synonyms = record.synonyms.clone();
            let outcome = upsert_gene(tx, &gene)?;
            if outcome.created {
                counters.incr("genes_created");
            }

            let inserted = insert_annotation(
                tx,
                &AnnotationEdge {
                    gene_id: outcome.gene_id,
                    term_id: &record.term_id,
                    evidence_code: &record.evidence_code,
                    qualifier: &record.qualifier,
                    reference: &record.reference,
                    assigned_by: &record.assigned_by,
                    annotation_date: &record.date,
                    source_file: &self.source_file,
                    imported_at: &self.imported_at,
                },
            )?;
            counters.incr(if inserted { "created" } else { "existing" });
        }
        Ok(())
    }
}

pub(crate) struct AnnotationEdge<'a> {
    pub gene_id: i64,
    pub term_id: &'a str,
    pub evidence_code: &'a str,
    pub qualifier: &'a str,
    pub reference: &'a str,
    pub assigned_by: &'a str,
    pub annotation_date: &'a str,
    pub source_file: &'a str,
    pub imported_at: &'a str,
}

pub(crate) fn insert_annotation(conn: &Connection, edge: &AnnotationEdge<'_>) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO annotations (
            gene_id, term_id, evidence_code, qualifier, reference, assigned_by,
            annotation_date, source_file, imported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let changed = stmt.execute(params![
        edge.gene_id,
        edge.term_id,
        edge.evidence_code,
        edge.qualifier,
        edge.reference,
        edge.assigned_by,
        edge.annotation_date,
        edge.source_file,
        edge.imported_at
    ])?;
    Ok(changed > 0)
}

/// Annotation edges from `source_file` whose term lies in `partition`.
pub(crate) fn annotations_in_partition(
    store: &GraphStore,
    source_file: &str,
    partition: Partition,
) -> rusqlite::Result<u64> {
    store.count(
        "SELECT COUNT(*) FROM annotations a
         JOIN terms t ON t.id = a.term_id
         WHERE a.source_file = ?1 AND t.namespace = ?2",
        params![source_file, partition.namespace()],
    )
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
