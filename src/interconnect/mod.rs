//! Term-to-term links across namespaces, derived from shared gene annotations.

use std::collections::BTreeMap;

use rusqlite::{Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::graph::model::{
    ConfidenceTier, DerivedRelation, MIN_SHARED_GENES_DEFAULT, Partition, TierThresholds,
    confidence_tier,
};
use crate::graph::{GraphStore, now_timestamp};
use crate::ingest::{BatchEngine, Counters, IngestStats, UpsertOp};

pub const CREATED_BY: &str = "namespace_interconnector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinTerms {
    pub biological_process: u64,
    pub cellular_component: u64,
    pub molecular_function: u64,
}

impl MinTerms {
    pub const fn for_partition(&self, partition: Partition) -> u64 {
        match partition {
            Partition::BiologicalProcess => self.biological_process,
            Partition::CellularComponent => self.cellular_component,
            Partition::MolecularFunction => self.molecular_function,
        }
    }
}

impl Default for MinTerms {
    fn default() -> Self {
        Self {
            biological_process: 25_000,
            cellular_component: 3_000,
            molecular_function: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterconnectConfig {
    pub min_shared_genes: u64,
    pub thresholds: TierThresholds,
    pub min_terms: MinTerms,
    pub min_multi_namespace_genes: u64,
}

impl Default for InterconnectConfig {
    fn default() -> Self {
        Self {
            min_shared_genes: MIN_SHARED_GENES_DEFAULT,
            thresholds: TierThresholds::default(),
            min_terms: MinTerms::default(),
            min_multi_namespace_genes: 10_000,
        }
    }
}

#[derive(Debug)]
pub enum InterconnectError {
    Precondition(Vec<String>),
    Store(rusqlite::Error),
}

impl std::fmt::Display for InterconnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Precondition(failures) => {
                write!(f, "interconnect preconditions not met: {}", failures.join("; "))
            }
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for InterconnectError {}

impl From<rusqlite::Error> for InterconnectError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateLink {
    pub from_term: String,
    pub to_term: String,
    pub relation: DerivedRelation,
    pub shared_genes: u64,
    pub confidence: ConfidenceTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InterconnectStats {
    pub multi_namespace_genes: u64,
    pub candidates: u64,
    pub created: u64,
    pub tiers: BTreeMap<String, u64>,
    pub relations: Vec<IngestStats>,
    pub interrupted: bool,
}

impl InterconnectStats {
    pub fn has_errors(&self) -> bool {
        self.relations.iter().any(IngestStats::has_errors)
    }
}

struct DerivedLinkInsert {
    relation: DerivedRelation,
    created_at: String,
}

impl UpsertOp for DerivedLinkInsert {
    type Record = CandidateLink;

    fn stage(&self) -> String {
        format!("derived_links:{}", self.relation.as_str())
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[CandidateLink],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO derived_links (
                from_term, to_term, relation, shared_genes, confidence, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for link in batch {
            let changed = stmt.execute(params![
                link.from_term,
                link.to_term,
                link.relation.as_str(),
                link.shared_genes as i64,
                link.confidence.as_str(),
                CREATED_BY,
                self.created_at
            ])?;
            counters.incr(if changed > 0 { "created" } else { "existing" });
        }
        Ok(())
    }
}

/// Checks every precondition and returns all failures at once.
pub fn check_preconditions(
    store: &GraphStore,
    config: &InterconnectConfig,
) -> Result<u64, InterconnectError> {
    let mut failures = Vec::new();
    for partition in Partition::ALL {
        let have = store.term_count(Some(partition.namespace()))?;
        let need = config.min_terms.for_partition(partition);
        if have < need {
            failures.push(format!("{partition} has {have} terms, need {need}"));
        }
    }

    let multi = multi_namespace_genes(store)?;
    if multi < config.min_multi_namespace_genes {
        failures.push(format!(
            "{multi} genes annotated in more than one namespace, need {}",
            config.min_multi_namespace_genes
        ));
    }

    if failures.is_empty() {
        Ok(multi)
    } else {
        Err(InterconnectError::Precondition(failures))
    }
}

pub fn multi_namespace_genes(store: &GraphStore) -> rusqlite::Result<u64> {
    store.count(
        "SELECT COUNT(*) FROM (
             SELECT a.gene_id FROM annotations a
             JOIN terms t ON t.id = a.term_id
             GROUP BY a.gene_id
             HAVING COUNT(DISTINCT t.namespace) > 1
         )",
        [],
    )
}

/// Term pairs for `relation` sharing at least `config.min_shared_genes` genes.
pub fn candidate_links(
    store: &GraphStore,
    relation: DerivedRelation,
    config: &InterconnectConfig,
) -> rusqlite::Result<Vec<CandidateLink>> {
    let (from, to) = relation.endpoints();
    let mut stmt = store.conn().prepare(
        "SELECT a.term_id, b.term_id, COUNT(DISTINCT a.gene_id) AS shared
         FROM annotations a
         JOIN terms ta ON ta.id = a.term_id AND ta.namespace = ?1
         JOIN annotations b ON b.gene_id = a.gene_id
         JOIN terms tb ON tb.id = b.term_id AND tb.namespace = ?2
         GROUP BY a.term_id, b.term_id
         HAVING shared >= ?3
         ORDER BY a.term_id ASC, b.term_id ASC",
    )?;
    let rows = stmt.query_map(
        params![from.namespace(), to.namespace(), config.min_shared_genes as i64],
        |row| {
            let shared = u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0);
            Ok(CandidateLink {
                from_term: row.get(0)?,
                to_term: row.get(1)?,
                relation,
                shared_genes: shared,
                confidence: confidence_tier(shared, config.thresholds),
            })
        },
    )?;
    rows.collect()
}

pub fn interconnect(
    store: &GraphStore,
    engine: &BatchEngine<'_>,
    config: &InterconnectConfig,
) -> Result<InterconnectStats, InterconnectError> {
    let multi = match check_preconditions(store, config) {
        Ok(multi) => multi,
        Err(err) => {
            warn!(error = %err, "skipping cross-namespace links");
            return Err(err);
        }
    };

    let mut stats = InterconnectStats {
        multi_namespace_genes: multi,
        ..InterconnectStats::default()
    };
    let created_at = now_timestamp();
    for relation in DerivedRelation::ALL {
        let candidates = candidate_links(store, relation, config)?;
        stats.candidates += candidates.len() as u64;
        for link in &candidates {
            *stats
                .tiers
                .entry(link.confidence.as_str().to_string())
                .or_insert(0) += 1;
        }

        let op = DerivedLinkInsert {
            relation,
            created_at: created_at.clone(),
        };
        let run = engine.run(&op, &candidates);
        stats.created += run.counters.get("created");
        let interrupted = run.interrupted;
        stats.relations.push(run);
        if interrupted {
            stats.interrupted = true;
            break;
        }
    }

    info!(
        candidates = stats.candidates,
        created = stats.created,
        multi_namespace_genes = stats.multi_namespace_genes,
        "cross-namespace links complete"
    );
    Ok(stats)
}
