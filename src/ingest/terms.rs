use rusqlite::{Transaction, params};
use serde::Serialize;

use crate::graph::model::Partition;
use crate::graph::{GraphStore, encode_json_list};
use crate::ingest::{Counters, MISSING_TERMS, UpsertOp};
use crate::source::reference::EnrichedTerm;

/// Upserts terms keyed by id. Provenance (`source_file`, `import_timestamp`)
/// is written at creation only; every other column is overwritten.
pub struct TermUpsert {
    pub partition: Partition,
    pub source_file: String,
    pub import_timestamp: String,
}

impl UpsertOp for TermUpsert {
    type Record = EnrichedTerm;

    fn stage(&self) -> String {
        format!("terms:{}", self.partition.namespace())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[EnrichedTerm],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO terms (
                id, name, namespace, definition, definition_refs, is_obsolete, synonyms,
                alt_ids, alt_id_additions, subsets, xrefs, comment, replaced_by, consider,
                created_by, creation_date, source_file, import_timestamp,
                reference_validated, name_corrected
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                namespace = excluded.namespace,
                definition = excluded.definition,
                definition_refs = excluded.definition_refs,
                is_obsolete = excluded.is_obsolete,
                synonyms = excluded.synonyms,
                alt_ids = excluded.alt_ids,
                alt_id_additions = excluded.alt_id_additions,
                subsets = excluded.subsets,
                xrefs = excluded.xrefs,
                comment = excluded.comment,
                replaced_by = excluded.replaced_by,
                consider = excluded.consider,
                created_by = excluded.created_by,
                creation_date = excluded.creation_date,
                reference_validated = excluded.reference_validated,
                name_corrected = excluded.name_corrected",
        )?;

        for record in batch {
            let term = &record.term;
            let existed = GraphStore::term_exists(tx, &term.id)?;
            stmt.execute(params![
                term.id,
                term.name,
                term.namespace,
                term.definition,
                encode_json_list(&term.definition_refs),
                term.is_obsolete as i64,
                encode_json_list(&term.synonyms),
                encode_json_list(&term.alt_ids),
                encode_json_list(&record.alt_id_additions),
                encode_json_list(&term.subsets),
                encode_json_list(&term.xrefs),
                term.comment,
                encode_json_list(&term.replaced_by),
                encode_json_list(&term.consider),
                term.created_by,
                term.creation_date,
                self.source_file,
                self.import_timestamp,
                record.reference_validated as i64,
                record.name_corrected as i64
            ])?;
            counters.incr(if existed { "updated" } else { "created" });
            if record.reference_validated {
                counters.incr("reference_validated");
            }
            if record.name_corrected {
                counters.incr("name_corrected");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AltMapping {
    pub obsolete_id: String,
    pub current_id: String,
    pub origin: AltOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AltOrigin {
    Parsed,
    Reference,
}

impl AltOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Reference => "reference",
        }
    }
}

/// Obsolete-id mappings for every alternative id carried by the terms.
pub fn alt_mappings_for(terms: &[EnrichedTerm]) -> Vec<AltMapping> {
    let mut out = Vec::new();
    for record in terms {
        for alt in &record.term.alt_ids {
            let origin = if record.alt_id_additions.contains(alt) {
                AltOrigin::Reference
            } else {
                AltOrigin::Parsed
            };
            out.push(AltMapping {
                obsolete_id: alt.clone(),
                current_id: record.term.id.clone(),
                origin,
            });
        }
    }
    out
}

pub struct AltMappingUpsert {
    pub partition: Partition,
}

impl UpsertOp for AltMappingUpsert {
    type Record = AltMapping;

    fn stage(&self) -> String {
        format!("alt_mappings:{}", self.partition.namespace())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[AltMapping],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO alt_mappings (obsolete_id, current_id, origin) VALUES (?1, ?2, ?3)",
        )?;
        for mapping in batch {
            if !GraphStore::term_exists(tx, &mapping.current_id)? {
                counters.incr(MISSING_TERMS);
                continue;
            }
            let changed = stmt.execute(params![
                mapping.obsolete_id,
                mapping.current_id,
                mapping.origin.as_str()
            ])?;
            counters.incr(if changed > 0 { "created" } else { "existing" });
        }
        Ok(())
    }
}
