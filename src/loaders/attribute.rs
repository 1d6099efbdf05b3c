use std::io::{self, BufRead};

use rusqlite::Transaction;
use serde::Serialize;
use serde_json::json;

use crate::ingest::{Counters, UpsertOp};
use crate::loaders::{GeneEntityEdge, LoaderKind, gene_by_symbol, link_gene_entity, upsert_entity};
use crate::source::tables::TableReadStats;

const HEADER_LINES: usize = 2;
const COLUMNS: usize = 7;

/// One gene-attribute association row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeEdge {
    pub symbol: String,
    pub source_desc: String,
    pub gene_id: Option<String>,
    pub full_condition: String,
    pub attribute: String,
    pub attribute_id: String,
    pub weight: Option<f64>,
}

pub const fn relation_for(kind: LoaderKind) -> &'static str {
    match kind {
        LoaderKind::Disease => "associated_with_disease",
        LoaderKind::Drug => "perturbed_by",
        LoaderKind::Virus => "infected_by",
        LoaderKind::Pathway => "member_of_pathway",
        LoaderKind::Modules => "belongs_to_module",
    }
}

/// Reads an attribute edge file: two header lines, then
/// `symbol, source, gene id, condition, attribute, attribute id, weight`.
pub fn read_attribute_edges<R: BufRead>(reader: R) -> io::Result<(Vec<AttributeEdge>, TableReadStats)> {
    let mut stats = TableReadStats::default();
    let mut out = Vec::new();
    for line in reader.lines().skip(HEADER_LINES) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.rows += 1;
        let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
        if cols.len() < COLUMNS || cols[0].is_empty() || cols[4].is_empty() {
            stats.invalid_rows += 1;
            continue;
        }
        out.push(AttributeEdge {
            symbol: cols[0].to_string(),
            source_desc: cols[1].to_string(),
            gene_id: present(cols[2]),
            full_condition: cols[3].to_string(),
            attribute: cols[4].to_string(),
            attribute_id: cols[5].to_string(),
            weight: cols[6].parse::<f64>().ok().filter(|value| value.is_finite()),
        });
    }
    Ok((out, stats))
}

fn present(raw: &str) -> Option<String> {
    match raw {
        "" | "-" | "NA" | "na" | "nan" => None,
        value => Some(value.to_string()),
    }
}

pub struct AttributeEdgeUpsert {
    pub kind: LoaderKind,
    pub source_file: String,
}

impl UpsertOp for AttributeEdgeUpsert {
    type Record = AttributeEdge;

    fn stage(&self) -> String {
        format!("loader:{}:{}", self.kind.as_str(), self.source_file)
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[AttributeEdge],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let entity_kind = self.kind.as_str();
        for edge in batch {
            let gene_id = gene_by_symbol(
                tx,
                &edge.symbol,
                edge.gene_id.as_deref(),
                &self.source_file,
                counters,
            )?;
            upsert_entity(
                tx,
                entity_kind,
                &edge.attribute,
                &json!({
                    "full_condition": edge.full_condition,
                    "attribute_id": edge.attribute_id,
                }),
                counters,
            )?;
            link_gene_entity(
                tx,
                &GeneEntityEdge {
                    gene_id,
                    entity_kind,
                    entity_name: &edge.attribute,
                    relation: relation_for(self.kind),
                    weight: edge.weight,
                    source_desc: &edge.source_desc,
                    source_file: &self.source_file,
                },
                counters,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::graph::gene::{GeneUpsert, upsert_gene};
    use crate::graph::model::IdSpace;
    use crate::ingest::{BatchEngine, ResumePolicy};

    const DISEASE: &str = "GeneSym\tsource\tGeneID\tcondition\tDisease\tGSE\tweight\n\
#\t#\t#\t#\t#\t#\t#\n\
TP53\tomics\t7157\tasthma_lung_GSE1\tasthma\tGSE1\t1.5\n\
BRCA1\tomics\tNA\tasthma_lung_GSE1\tasthma\tGSE1\tnot-a-number\n\
\tomics\t1\tx\ty\tz\t1\n\
short\trow\n";

    #[test]
    fn reads_rows_after_two_header_lines() {
        let (edges, stats) = read_attribute_edges(DISEASE.as_bytes()).expect("read");
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.invalid_rows, 2);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].gene_id.as_deref(), Some("7157"));
        assert_eq!(edges[0].weight, Some(1.5));
        assert_eq!(edges[1].gene_id, None);
        assert_eq!(edges[1].weight, None);
    }

    #[test]
    fn links_genes_by_symbol_and_reruns_cleanly() {
        let store = GraphStore::open_in_memory().expect("store");
        let mut existing = GeneUpsert::keyed(IdSpace::Symbol, "TP53", "collapsed_go.symbol");
        existing.fill.numeric_id = Some("999".to_string());
        upsert_gene(store.conn(), &existing).expect("existing gene");

        let (edges, _) = read_attribute_edges(DISEASE.as_bytes()).expect("read");
        let op = AttributeEdgeUpsert {
            kind: LoaderKind::Disease,
            source_file: "disease.tsv".to_string(),
        };
        let engine = BatchEngine::new(&store, 10).with_resume(ResumePolicy::Off);
        let first = engine.run(&op, &edges);
        assert_eq!(first.counters.get("genes_created"), 1);
        assert_eq!(first.counters.get("entities_created"), 1);
        assert_eq!(first.counters.get("edges_created"), 2);

        let second = engine.run(&op, &edges);
        assert_eq!(second.counters.get("edges_updated"), 2);
        assert_eq!(second.counters.get("genes_created"), 0);

        let genes = store.genes().expect("genes");
        assert_eq!(genes.len(), 2);
        assert_eq!(genes[0].numeric_id.as_deref(), Some("999"));
        let relations = store
            .grouped_counts("SELECT relation, COUNT(*) FROM gene_entity_edges GROUP BY relation")
            .expect("counts");
        assert_eq!(relations.get("associated_with_disease"), Some(&2));
    }
}
