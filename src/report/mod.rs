//! Run reports and graph summaries.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::graph::GraphStore;
use crate::pipeline::{InterconnectOutcome, LoaderOutcome, PartitionReport, PhaseOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GeneCoverage {
    pub total: u64,
    pub with_accession: u64,
    pub with_numeric_id: u64,
    pub with_symbol: u64,
    pub accession_and_numeric_id: u64,
    pub accession_and_symbol: u64,
    pub numeric_id_and_symbol: u64,
    pub all_three: u64,
    pub consolidated: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GraphSummary {
    pub terms: BTreeMap<String, u64>,
    pub genes: u64,
    pub entities: BTreeMap<String, u64>,
    pub hierarchy_edges: BTreeMap<String, u64>,
    pub annotations: u64,
    /// Keyed `relation:tier`.
    pub derived_links: BTreeMap<String, u64>,
    pub gene_entity_edges: BTreeMap<String, u64>,
    pub alt_mappings: u64,
    pub gene_coverage: GeneCoverage,
    pub mean_annotations_per_gene: f64,
}

pub fn summarize(store: &GraphStore) -> rusqlite::Result<GraphSummary> {
    let genes = store.gene_count()?;
    let annotations = store.annotation_count()?;
    let mean_annotations_per_gene = if genes == 0 {
        0.0
    } else {
        annotations as f64 / genes as f64
    };
    Ok(GraphSummary {
        terms: store.grouped_counts("SELECT namespace, COUNT(*) FROM terms GROUP BY namespace")?,
        genes,
        entities: store.grouped_counts("SELECT kind, COUNT(*) FROM entities GROUP BY kind")?,
        hierarchy_edges: store
            .grouped_counts("SELECT kind, COUNT(*) FROM hierarchy_edges GROUP BY kind")?,
        annotations,
        derived_links: store.grouped_counts(
            "SELECT relation || ':' || confidence, COUNT(*) FROM derived_links
             GROUP BY relation, confidence",
        )?,
        gene_entity_edges: store
            .grouped_counts("SELECT relation, COUNT(*) FROM gene_entity_edges GROUP BY relation")?,
        alt_mappings: store.alt_mapping_count()?,
        gene_coverage: gene_coverage(store)?,
        mean_annotations_per_gene,
    })
}

fn gene_coverage(store: &GraphStore) -> rusqlite::Result<GeneCoverage> {
    store.conn().query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(a), 0),
            COALESCE(SUM(n), 0),
            COALESCE(SUM(s), 0),
            COALESCE(SUM(a * n), 0),
            COALESCE(SUM(a * s), 0),
            COALESCE(SUM(n * s), 0),
            COALESCE(SUM(a * n * s), 0),
            COALESCE(SUM(consolidated), 0)
         FROM (
            SELECT
                accession IS NOT NULL AS a,
                numeric_id IS NOT NULL AS n,
                symbol IS NOT NULL AS s,
                consolidated
            FROM genes
         )",
        [],
        |row| {
            let get = |idx: usize| row.get::<_, i64>(idx).map(|value| value.max(0) as u64);
            Ok(GeneCoverage {
                total: get(0)?,
                with_accession: get(1)?,
                with_numeric_id: get(2)?,
                with_symbol: get(3)?,
                accession_and_numeric_id: get(4)?,
                accession_and_symbol: get(5)?,
                numeric_id_and_symbol: get(6)?,
                all_three: get(7)?,
                consolidated: get(8)?,
            })
        },
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub partitions: Vec<PartitionReport>,
    pub interconnect: InterconnectOutcome,
    pub loaders: Vec<LoaderOutcome>,
    pub summary: GraphSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Text,
}

impl ReportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "text" | "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "genegraph run {} .. {}", report.started_at, report.finished_at);

    for partition in &report.partitions {
        let _ = writeln!(out, "\n[{}] {:?}", partition.partition, partition.status);
        for phase in &partition.phases {
            let outcome = match &phase.outcome {
                PhaseOutcome::Success => "ok".to_string(),
                PhaseOutcome::PartialWithErrors { errors } => format!("partial ({} errors)", errors.len()),
                PhaseOutcome::Failed { reason } => format!("failed: {reason}"),
            };
            let _ = writeln!(out, "  {:<36} {:>8} ms  {outcome}", phase.phase, phase.elapsed_ms);
            for note in &phase.notes {
                let _ = writeln!(out, "    - {note}");
            }
        }
    }

    let _ = writeln!(out, "\ninterconnect:");
    match &report.interconnect {
        InterconnectOutcome::Completed(stats) => {
            let _ = writeln!(
                out,
                "  {} candidates, {} created, {} multi-namespace genes",
                stats.candidates, stats.created, stats.multi_namespace_genes
            );
            write_counts(&mut out, "  ", &stats.tiers);
        }
        InterconnectOutcome::PreconditionsNotMet { failures } => {
            for failure in failures {
                let _ = writeln!(out, "  skipped: {failure}");
            }
        }
        InterconnectOutcome::Failed { reason } => {
            let _ = writeln!(out, "  failed: {reason}");
        }
        InterconnectOutcome::Skipped { reason } => {
            let _ = writeln!(out, "  skipped: {reason}");
        }
    }

    if !report.loaders.is_empty() {
        let _ = writeln!(out, "\nloaders:");
        for loader in &report.loaders {
            match &loader.stats {
                Some(stats) => {
                    let _ = writeln!(
                        out,
                        "  {} {}: {} files, {} rows, {} invalid",
                        loader.kind.as_str(),
                        loader.path,
                        stats.files.len(),
                        stats.read.rows,
                        stats.read.invalid_rows
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  {} {}: failed: {}",
                        loader.kind.as_str(),
                        loader.path,
                        loader.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    out.push_str(&render_summary_text(&report.summary));
    out
}

pub fn render_summary_text(summary: &GraphSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nterms:");
    write_counts(&mut out, "  ", &summary.terms);
    let _ = writeln!(out, "genes: {}", summary.genes);
    let coverage = &summary.gene_coverage;
    let _ = writeln!(
        out,
        "  accession {} / numeric id {} / symbol {} / all three {} / consolidated {}",
        coverage.with_accession,
        coverage.with_numeric_id,
        coverage.with_symbol,
        coverage.all_three,
        coverage.consolidated
    );
    let _ = writeln!(out, "annotations: {}", summary.annotations);
    let _ = writeln!(out, "mean annotations per gene: {:.2}", summary.mean_annotations_per_gene);
    let _ = writeln!(out, "alt mappings: {}", summary.alt_mappings);
    let _ = writeln!(out, "hierarchy edges:");
    write_counts(&mut out, "  ", &summary.hierarchy_edges);
    let _ = writeln!(out, "derived links:");
    write_counts(&mut out, "  ", &summary.derived_links);
    let _ = writeln!(out, "entities:");
    write_counts(&mut out, "  ", &summary.entities);
    let _ = writeln!(out, "gene-entity edges:");
    write_counts(&mut out, "  ", &summary.gene_entity_edges);
    out
}

fn write_counts(out: &mut String, indent: &str, counts: &BTreeMap<String, u64>) {
    for (key, value) in counts {
        let _ = writeln!(out, "{indent}{key}: {value}");
    }
}

pub fn write_report(path: &Path, report: &RunReport, format: ReportFormat) -> io::Result<()> {
    let body = match format {
        ReportFormat::Json => {
            let mut rendered = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
            rendered.push('\n');
            rendered
        }
        ReportFormat::Text => render_text(report),
    };
    replace_file(path, body.as_bytes())
}

/// Writes a sibling temp file, syncs it, then renames it over `path`.
fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let staging = staging_path(&parent, path)?;

    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staging)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path))
        .and_then(|()| sync_dir(&parent));

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn staging_path(parent: &Path, target: &Path) -> io::Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "report path has no file name"))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(io::Error::other)?
        .subsec_nanos();
    Ok(parent.join(format!(".{name}.{}.{nanos}.partial", std::process::id())))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::gene::{GeneUpsert, upsert_gene};
    use crate::graph::model::{IdSpace, Partition};
    use crate::pipeline::{PartitionStatus, PhaseReport};

    fn seeded_store() -> GraphStore {
        let store = GraphStore::open_in_memory().expect("store");
        let mut tp53 = GeneUpsert::keyed(IdSpace::Symbol, "TP53", "a.gaf");
        tp53.fill.accession = Some("P04637".to_string());
        tp53.fill.numeric_id = Some("7157".to_string());
        upsert_gene(store.conn(), &tp53).expect("tp53");
        let mut brca1 = GeneUpsert::keyed(IdSpace::Accession, "P38398", "a.gaf");
        brca1.fill.symbol = Some("BRCA1".to_string());
        upsert_gene(store.conn(), &brca1).expect("brca1");
        upsert_gene(store.conn(), &GeneUpsert::keyed(IdSpace::NumericId, "1", "b.txt")).expect("numeric");
        store
    }

    #[test]
    fn coverage_counts_identifier_combinations() {
        let store = seeded_store();
        let summary = summarize(&store).expect("summary");
        assert_eq!(summary.genes, 3);
        let coverage = summary.gene_coverage;
        assert_eq!(coverage.total, 3);
        assert_eq!(coverage.with_accession, 2);
        assert_eq!(coverage.with_numeric_id, 2);
        assert_eq!(coverage.with_symbol, 2);
        assert_eq!(coverage.accession_and_symbol, 2);
        assert_eq!(coverage.accession_and_numeric_id, 1);
        assert_eq!(coverage.all_three, 1);
        assert_eq!(coverage.consolidated, 0);
        assert_eq!(summary.mean_annotations_per_gene, 0.0);
    }

    #[test]
    fn empty_store_summarizes_to_zeroes() {
        let store = GraphStore::open_in_memory().expect("store");
        let summary = summarize(&store).expect("summary");
        assert_eq!(summary, GraphSummary::default());
    }

    #[test]
    fn writes_json_and_text_reports_in_place() {
        let store = seeded_store();
        let report = RunReport {
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:00:05Z".to_string(),
            partitions: vec![PartitionReport {
                partition: Partition::BiologicalProcess,
                status: PartitionStatus::CompletedWithErrors,
                phases: vec![PhaseReport {
                    phase: "annotations".to_string(),
                    outcome: PhaseOutcome::PartialWithErrors {
                        errors: vec!["batch 0: constraint failed".to_string()],
                    },
                    elapsed_ms: 12,
                    counters: Default::default(),
                    notes: vec!["2 invalid rows".to_string()],
                }],
            }],
            interconnect: InterconnectOutcome::PreconditionsNotMet {
                failures: vec!["biological_process has 0 terms (< 25000)".to_string()],
            },
            loaders: Vec::new(),
            summary: summarize(&store).expect("summary"),
        };

        let dir = tempfile::tempdir().expect("tempdir");
        let json_path = dir.path().join("reports/run.json");
        write_report(&json_path, &report, ReportFormat::Json).expect("json report");
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).expect("read")).expect("parse");
        assert_eq!(parsed["summary"]["genes"], 3);
        assert_eq!(parsed["partitions"][0]["status"], "completed_with_errors");
        assert_eq!(parsed["interconnect"]["status"], "preconditions_not_met");

        let text_path = dir.path().join("run.txt");
        write_report(&text_path, &report, ReportFormat::Text).expect("text report");
        write_report(&text_path, &report, ReportFormat::Text).expect("overwrite");
        let text = fs::read_to_string(&text_path).expect("read text");
        assert!(text.contains("partial (1 errors)"));
        assert!(text.contains("skipped: biological_process has 0 terms"));

        let leftovers = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn report_format_parses() {
        assert_eq!(ReportFormat::parse("JSON"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("txt"), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::parse("yaml"), None);
    }
}
