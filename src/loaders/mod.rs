//! Secondary loaders that attach disease, drug, virus, pathway and
//! functional-module entities to genes already in the graph.

pub mod attribute;
pub mod modules;
pub mod pathway;

use std::path::{Path, PathBuf};

use glob::glob;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::info;
use walkdir::WalkDir;

use crate::graph::gene::{GeneUpsert, upsert_gene};
use crate::graph::model::IdSpace;
use crate::graph::now_timestamp;
use crate::ingest::{BatchEngine, Counters, IngestStats};
use crate::source::tables::TableReadStats;
use crate::source::{SourceError, read_with, source_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    Disease,
    Drug,
    Virus,
    Pathway,
    Modules,
}

impl LoaderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disease => "disease",
            Self::Drug => "drug",
            Self::Virus => "virus",
            Self::Pathway => "pathway",
            Self::Modules => "modules",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disease" => Some(Self::Disease),
            "drug" => Some(Self::Drug),
            "virus" | "viral" => Some(Self::Virus),
            "pathway" | "pathways" => Some(Self::Pathway),
            "modules" | "module" => Some(Self::Modules),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSpec {
    pub kind: LoaderKind,
    pub path: String,
}

#[derive(Debug)]
pub enum LoaderError {
    Source(SourceError),
    Glob(String),
    NoInput(String),
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(err) => write!(f, "{err}"),
            Self::Glob(message) => write!(f, "invalid loader glob: {message}"),
            Self::NoInput(path) => write!(f, "no loader input found at {path}"),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<SourceError> for LoaderError {
    fn from(value: SourceError) -> Self {
        Self::Source(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub kind: LoaderKind,
    pub files: Vec<String>,
    pub read: TableReadStats,
    pub ingest: Vec<IngestStats>,
}

impl LoaderStats {
    pub fn has_errors(&self) -> bool {
        self.ingest.iter().any(IngestStats::has_errors)
    }

    pub fn interrupted(&self) -> bool {
        self.ingest.iter().any(|stats| stats.interrupted)
    }
}

/// Runs one loader over every file `spec.path` resolves to. Relative paths
/// resolve against `base`.
pub fn run_loader(
    engine: &BatchEngine<'_>,
    spec: &LoaderSpec,
    base: &Path,
) -> Result<LoaderStats, LoaderError> {
    let files = resolve_inputs(base, &spec.path)?;
    let mut stats = LoaderStats {
        kind: spec.kind,
        files: Vec::with_capacity(files.len()),
        read: TableReadStats::default(),
        ingest: Vec::new(),
    };

    for path in files {
        let source_file = source_label(&path);
        let run = match spec.kind {
            LoaderKind::Disease | LoaderKind::Drug | LoaderKind::Virus => {
                let (edges, read) = read_with(&path, |reader| attribute::read_attribute_edges(reader))?;
                add_read(&mut stats.read, read);
                let op = attribute::AttributeEdgeUpsert {
                    kind: spec.kind,
                    source_file: source_file.clone(),
                };
                engine.run(&op, &edges)
            }
            LoaderKind::Pathway => {
                let (pathways, read) = read_with(&path, |reader| pathway::read_pathways(reader))?;
                add_read(&mut stats.read, read);
                let op = pathway::PathwayUpsert {
                    source_file: source_file.clone(),
                };
                engine.run(&op, &pathways)
            }
            LoaderKind::Modules => {
                let (edges, read) = read_with(&path, |reader| modules::read_module_edges(reader))?;
                add_read(&mut stats.read, read);
                let op = modules::ModuleEdgeUpsert {
                    source_file: source_file.clone(),
                };
                engine.run(&op, &edges)
            }
        };
        stats.files.push(source_file);
        let interrupted = run.interrupted;
        stats.ingest.push(run);
        if interrupted {
            break;
        }
    }

    info!(
        kind = spec.kind.as_str(),
        files = stats.files.len(),
        rows = stats.read.rows,
        invalid = stats.read.invalid_rows,
        "loader complete"
    );
    Ok(stats)
}

/// A glob, a directory walked recursively, or a single file.
pub fn resolve_inputs(base: &Path, raw_path: &str) -> Result<Vec<PathBuf>, LoaderError> {
    let raw_path = raw_path.trim();
    let candidate = Path::new(raw_path);
    let expanded = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let mut files = if looks_like_glob(raw_path) {
        glob_paths(&expanded)?
    } else if expanded.is_dir() {
        WalkDir::new(&expanded)
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| entry.path().to_path_buf())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>()
    } else if expanded.is_file() {
        vec![expanded.clone()]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        return Err(LoaderError::NoInput(expanded.display().to_string()));
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn looks_like_glob(path: &str) -> bool {
    ['*', '?', '[', ']', '{', '}']
        .iter()
        .any(|ch| path.contains(*ch))
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    let pattern_str = pattern.to_string_lossy();
    let entries =
        glob(&pattern_str).map_err(|err| LoaderError::Glob(format!("{} ({pattern_str})", err.msg)))?;
    let mut out = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            Ok(_) => {}
            Err(err) => return Err(LoaderError::Glob(err.to_string())),
        }
    }
    Ok(out)
}

fn add_read(total: &mut TableReadStats, read: TableReadStats) {
    total.rows += read.rows;
    total.invalid_rows += read.invalid_rows;
}

/// Inserts the entity unless `(kind, name)` exists. Attributes are written
/// on creation only.
pub(crate) fn upsert_entity(
    conn: &Connection,
    kind: &str,
    name: &str,
    attributes: &serde_json::Value,
    counters: &mut Counters,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO entities (kind, name, attributes, created_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let changed = stmt.execute(params![kind, name, attributes.to_string(), now_timestamp()])?;
    if changed > 0 {
        counters.incr("entities_created");
    }
    Ok(())
}

/// Gene keyed by symbol; the numeric id is only filled when missing.
pub(crate) fn gene_by_symbol(
    conn: &Connection,
    symbol: &str,
    numeric_id: Option<&str>,
    source_file: &str,
    counters: &mut Counters,
) -> rusqlite::Result<i64> {
    let mut upsert = GeneUpsert::keyed(IdSpace::Symbol, symbol, source_file);
    upsert.fill.numeric_id = numeric_id.map(ToOwned::to_owned);
    let outcome = upsert_gene(conn, &upsert)?;
    if outcome.created {
        counters.incr("genes_created");
    }
    Ok(outcome.gene_id)
}

pub(crate) struct GeneEntityEdge<'a> {
    pub gene_id: i64,
    pub entity_kind: &'a str,
    pub entity_name: &'a str,
    pub relation: &'a str,
    pub weight: Option<f64>,
    pub source_desc: &'a str,
    pub source_file: &'a str,
}

/// Creates the edge or refreshes its weight and description.
pub(crate) fn link_gene_entity(
    conn: &Connection,
    edge: &GeneEntityEdge<'_>,
    counters: &mut Counters,
) -> rusqlite::Result<()> {
    let mut exists = conn.prepare_cached(
        "SELECT 1 FROM gene_entity_edges
         WHERE gene_id = ?1 AND entity_kind = ?2 AND entity_name = ?3 AND relation = ?4 AND source_file = ?5",
    )?;
    let existed = exists.exists(params![
        edge.gene_id,
        edge.entity_kind,
        edge.entity_name,
        edge.relation,
        edge.source_file
    ])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO gene_entity_edges (
            gene_id, entity_kind, entity_name, relation, weight, source_desc, source_file
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(gene_id, entity_kind, entity_name, relation, source_file) DO UPDATE SET
            weight = excluded.weight,
            source_desc = excluded.source_desc",
    )?;
    stmt.execute(params![
        edge.gene_id,
        edge.entity_kind,
        edge.entity_name,
        edge.relation,
        edge.weight,
        edge.source_desc,
        edge.source_file
    ])?;
    counters.incr(if existed { "edges_updated" } else { "edges_created" });
    Ok(())
}
