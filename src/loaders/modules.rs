use std::io::{self, BufRead};

use rusqlite::{Connection, Transaction, params};
use serde::Serialize;
use serde_json::json;

use crate::ingest::{Counters, UpsertOp};
use crate::loaders::{GeneEntityEdge, gene_by_symbol, link_gene_entity, upsert_entity};
use crate::source::tables::TableReadStats;

pub const MODULE_KIND: &str = "module";
const MEMBERSHIP_RELATION: &str = "belongs_to_module";
const CONTAINS_RELATION: &str = "contains";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleEdgeKind {
    /// Module contains a gene symbol.
    Gene,
    /// Module contains a smaller module.
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleEdge {
    pub source: String,
    pub target: String,
    pub kind: ModuleEdgeKind,
}

/// `(level, id)` from a `Cluster<level>-<id>` module name.
pub fn cluster_level(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("Cluster")?;
    let (level, id) = rest.split_once('-')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}

/// Reads `source, target, edge_type` rows; edge type is `gene` or `default`.
pub fn read_module_edges<R: BufRead>(reader: R) -> io::Result<(Vec<ModuleEdge>, TableReadStats)> {
    let mut stats = TableReadStats::default();
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.rows += 1;
        let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
        if cols.len() < 3 || cols[0].is_empty() || cols[1].is_empty() {
            stats.invalid_rows += 1;
            continue;
        }
        let kind = match cols[2] {
            "gene" => ModuleEdgeKind::Gene,
            "default" => ModuleEdgeKind::Module,
            _ => {
                stats.invalid_rows += 1;
                continue;
            }
        };
        out.push(ModuleEdge {
            source: cols[0].to_string(),
            target: cols[1].to_string(),
            kind,
        });
    }
    Ok((out, stats))
}

pub struct ModuleEdgeUpsert {
    pub source_file: String,
}

impl UpsertOp for ModuleEdgeUpsert {
    type Record = ModuleEdge;

    fn stage(&self) -> String {
        format!("loader:modules:{}", self.source_file)
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[ModuleEdge],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        for edge in batch {
            upsert_module(tx, &edge.source, counters)?;
            match edge.kind {
                ModuleEdgeKind::Gene => {
                    let gene_id = gene_by_symbol(tx, &edge.target, None, &self.source_file, counters)?;
                    link_gene_entity(
                        tx,
                        &GeneEntityEdge {
                            gene_id,
                            entity_kind: MODULE_KIND,
                            entity_name: &edge.source,
                            relation: MEMBERSHIP_RELATION,
                            weight: None,
                            source_desc: "",
                            source_file: &self.source_file,
                        },
                        counters,
                    )?;
                }
                ModuleEdgeKind::Module => {
                    upsert_module(tx, &edge.target, counters)?;
                    let changed = tx.execute(
                        "INSERT OR IGNORE INTO entity_edges (
                            parent_kind, parent_name, child_kind, child_name, relation, source_file
                        ) VALUES (?1, ?2, ?1, ?3, ?4, ?5)",
                        params![
                            MODULE_KIND,
                            edge.source,
                            edge.target,
                            CONTAINS_RELATION,
                            self.source_file
                        ],
                    )?;
                    counters.incr(if changed > 0 { "edges_created" } else { "edges_existing" });
                }
            }
        }
        Ok(())
    }
}

fn upsert_module(conn: &Connection, name: &str, counters: &mut Counters) -> rusqlite::Result<()> {
    let attributes = match cluster_level(name) {
        Some((level, cluster_id)) => json!({ "level": level, "cluster_id": cluster_id }),
        None => json!({}),
    };
    upsert_entity(conn, MODULE_KIND, name, &attributes, counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::ingest::{BatchEngine, ResumePolicy};

    const EDGES: &str = "Cluster0-0\tCluster1-4\tdefault\n\
Cluster1-4\tTP53\tgene\n\
Cluster1-4\tBRCA1\tgene\n\
Cluster1-4\tCluster2-9\tweird\n";

    #[test]
    fn cluster_names_carry_level_and_id() {
        assert_eq!(cluster_level("Cluster3-120"), Some((3, 120)));
        assert_eq!(cluster_level("Cluster-x"), None);
        assert_eq!(cluster_level("module7"), None);
    }

    #[test]
    fn module_edges_create_membership_and_containment() {
        let (edges, stats) = read_module_edges(EDGES.as_bytes()).expect("read");
        assert_eq!(stats.invalid_rows, 1);
        assert_eq!(edges.len(), 3);

        let store = GraphStore::open_in_memory().expect("store");
        let op = ModuleEdgeUpsert {
            source_file: "nest.edges".to_string(),
        };
        let engine = BatchEngine::new(&store, 2).with_resume(ResumePolicy::Off);
        let first = engine.run(&op, &edges);
        assert_eq!(first.counters.get("entities_created"), 2);
        assert_eq!(first.counters.get("genes_created"), 2);
        assert_eq!(first.counters.get("edges_created"), 3);

        let second = engine.run(&op, &edges);
        assert_eq!(second.counters.get("entities_created"), 0);
        assert_eq!(second.counters.get("edges_existing"), 1);
        assert_eq!(second.counters.get("edges_updated"), 2);

        let level: String = store
            .conn()
            .query_row(
                "SELECT attributes FROM entities WHERE kind = 'module' AND name = 'Cluster1-4'",
                [],
                |row| row.get(0),
            )
            .expect("module");
        let parsed: serde_json::Value = serde_json::from_str(&level).expect("json");
        assert_eq!(parsed["level"], 1);
        assert_eq!(
            store
                .count("SELECT COUNT(*) FROM entity_edges WHERE relation = 'contains'", [])
                .expect("count"),
            1
        );
    }
}
