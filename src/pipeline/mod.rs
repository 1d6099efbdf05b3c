//! Partition-by-partition orchestration of the ingestion phases, followed by
//! the interconnector and the secondary loaders.
//!
//! A `Failed` phase halts only its own partition. Earlier partitions stay
//! committed, and later partitions still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PartitionFiles};
use crate::consolidate::{ConsolidationStats, consolidate_genes};
use crate::graph::model::{IdSpace, Partition};
use crate::graph::{GraphStore, now_timestamp};
use crate::ingest::annotations::{AnnotationUpsert, annotations_in_partition};
use crate::ingest::hierarchy::{HierarchyTableUpsert, StanzaRelationUpsert, stanza_relations_for};
use crate::ingest::terms::{AltMappingUpsert, TermUpsert, alt_mappings_for};
use crate::ingest::xref::{CollapsedGeneUpsert, CollapsedHierarchyUpsert};
use crate::ingest::{BatchEngine, Counters, IngestStats};
use crate::interconnect::{InterconnectError, InterconnectStats, interconnect};
use crate::loaders::{LoaderKind, LoaderStats, run_loader};
use crate::report::{RunReport, summarize};
use crate::source::gaf::read_annotations;
use crate::source::obo::{ParsedTerm, parse_stanzas};
use crate::source::reference::{EnrichedTerm, ReferenceTables};
use crate::source::tables::{read_collapsed_table, read_hierarchy_table};
use crate::source::{read_with, source_label};

const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prerequisites,
    Parse,
    Enrich,
    IngestTerms,
    HierarchyFromStanzas,
    HierarchyFromTable,
    Annotations,
    Consolidate,
    CrossReference(IdSpace),
    ConsolidateAfterCrossReference,
    Validate,
}

impl Phase {
    pub const SEQUENCE: [Phase; 13] = [
        Phase::Prerequisites,
        Phase::Parse,
        Phase::Enrich,
        Phase::IngestTerms,
        Phase::HierarchyFromStanzas,
        Phase::HierarchyFromTable,
        Phase::Annotations,
        Phase::Consolidate,
        Phase::CrossReference(IdSpace::NumericId),
        Phase::CrossReference(IdSpace::Symbol),
        Phase::CrossReference(IdSpace::Accession),
        Phase::ConsolidateAfterCrossReference,
        Phase::Validate,
    ];

    pub fn name(&self) -> String {
        match self {
            Self::Prerequisites => "prerequisites".to_string(),
            Self::Parse => "parse".to_string(),
            Self::Enrich => "enrich".to_string(),
            Self::IngestTerms => "ingest_terms".to_string(),
            Self::HierarchyFromStanzas => "hierarchy_from_stanzas".to_string(),
            Self::HierarchyFromTable => "hierarchy_from_table".to_string(),
            Self::Annotations => "annotations".to_string(),
            Self::Consolidate => "consolidate".to_string(),
            Self::CrossReference(space) => format!("cross_reference:{}", space.as_str()),
            Self::ConsolidateAfterCrossReference => "consolidate_after_cross_reference".to_string(),
            Self::Validate => "validate".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Success,
    PartialWithErrors { errors: Vec<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    pub outcome: PhaseOutcome,
    pub elapsed_ms: u64,
    pub counters: Counters,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Completed,
    CompletedWithErrors,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub partition: Partition,
    pub status: PartitionStatus,
    pub phases: Vec<PhaseReport>,
}

impl PartitionReport {
    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|phase| phase.phase == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InterconnectOutcome {
    Completed(InterconnectStats),
    PreconditionsNotMet { failures: Vec<String> },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderOutcome {
    pub kind: LoaderKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<LoaderStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Post-run consistency check. Findings are warnings only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFinding {
    pub check: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum PipelineError {
    Prerequisites(Vec<String>),
    Store(rusqlite::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prerequisites(problems) => {
                write!(f, "prerequisites not met: {}", problems.join("; "))
            }
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<rusqlite::Error> for PipelineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value)
    }
}

struct PhaseResult {
    outcome: PhaseOutcome,
    counters: Counters,
    notes: Vec<String>,
}

impl PhaseResult {
    fn success(counters: Counters) -> Self {
        Self {
            outcome: PhaseOutcome::Success,
            counters,
            notes: Vec::new(),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: PhaseOutcome::Failed {
                reason: reason.into(),
            },
            counters: Counters::default(),
            notes: Vec::new(),
        }
    }

    /// Interruption fails the phase; batch errors make it partial.
    fn from_runs(runs: &[IngestStats], mut counters: Counters) -> Self {
        let mut errors = Vec::new();
        let mut interrupted = false;
        for run in runs {
            counters.add(&format!("{}.applied", run.stage), run.applied_records);
            counters.add(&format!("{}.resumed", run.stage), run.resumed_records);
            if run.failed_records > 0 {
                counters.add(&format!("{}.failed", run.stage), run.failed_records);
            }
            if run.unconfirmed_batches > 0 {
                counters.add(&format!("{}.unconfirmed_batches", run.stage), run.unconfirmed_batches);
            }
            counters.merge_prefixed(&run.stage, &run.counters);
            errors.extend(run.errors.iter().map(|err| format!("{}: {err}", run.stage)));
            interrupted |= run.interrupted;
        }
        let outcome = if interrupted {
            PhaseOutcome::Failed {
                reason: INTERRUPTED.to_string(),
            }
        } else if errors.is_empty() {
            PhaseOutcome::Success
        } else {
            PhaseOutcome::PartialWithErrors { errors }
        };
        Self {
            outcome,
            counters,
            notes: Vec::new(),
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// State handed from one phase to the next within a partition.
#[derive(Default)]
struct PartitionState {
    parsed: Vec<ParsedTerm>,
    enriched: Vec<EnrichedTerm>,
    annotations_kept: u64,
    annotation_source: String,
}

pub struct Pipeline<'a> {
    store: &'a GraphStore,
    config: &'a Config,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a GraphStore, config: &'a Config) -> Self {
        Self {
            store,
            config,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<&'a AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn engine(&self, batch_size: usize) -> BatchEngine<'a> {
        BatchEngine::new(self.store, batch_size)
            .with_resume(self.config.resume)
            .with_cancel(self.cancel)
    }

    /// Every input of every requested partition must exist and the store must
    /// answer, or nothing is written.
    pub fn check_prerequisites(&self, partitions: &[Partition]) -> Result<(), PipelineError> {
        let mut problems = Vec::new();
        for partition in partitions {
            problems.extend(missing_inputs(*partition, &self.config.partition_files(*partition)));
        }
        if let Err(err) = self.store.ping() {
            problems.push(format!("store unreachable: {err}"));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            for problem in &problems {
                error!(problem = %problem, "prerequisite failed");
            }
            Err(PipelineError::Prerequisites(problems))
        }
    }

    /// Partitions, then the interconnector, then every configured loader.
    pub fn run(&self, partitions: &[Partition]) -> Result<RunReport, PipelineError> {
        let started_at = now_timestamp();
        let reports = self.run_partitions(partitions)?;

        let (interconnect, loaders) = if self.cancelled() {
            warn!("run interrupted; skipping interconnector and loaders");
            (
                InterconnectOutcome::Skipped {
                    reason: INTERRUPTED.to_string(),
                },
                Vec::new(),
            )
        } else {
            (self.run_interconnect(), self.run_loaders())
        };

        Ok(RunReport {
            started_at,
            finished_at: now_timestamp(),
            partitions: reports,
            interconnect,
            loaders,
            summary: summarize(self.store)?,
        })
    }

    pub fn run_partitions(&self, partitions: &[Partition]) -> Result<Vec<PartitionReport>, PipelineError> {
        self.check_prerequisites(partitions)?;
        let mut reports = Vec::with_capacity(partitions.len());
        for partition in partitions {
            if self.cancelled() {
                break;
            }
            reports.push(self.run_partition(*partition));
        }
        Ok(reports)
    }

    pub fn run_partition(&self, partition: Partition) -> PartitionReport {
        let files = self.config.partition_files(partition);
        let mut state = PartitionState::default();
        let mut report = PartitionReport {
            partition,
            status: PartitionStatus::Completed,
            phases: Vec::with_capacity(Phase::SEQUENCE.len()),
        };
        info!(partition = %partition, "partition started");

        for phase in Phase::SEQUENCE {
            let started = Instant::now();
            let result = if self.cancelled() {
                PhaseResult::failed(INTERRUPTED)
            } else {
                self.run_phase(phase, partition, &files, &mut state)
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &result.outcome {
                PhaseOutcome::Success => {
                    info!(partition = %partition, phase = %phase.name(), elapsed_ms, "phase complete");
                }
                PhaseOutcome::PartialWithErrors { errors } => {
                    warn!(partition = %partition, phase = %phase.name(), errors = errors.len(), "phase completed with errors");
                    report.status = PartitionStatus::CompletedWithErrors;
                }
                PhaseOutcome::Failed { reason } => {
                    error!(partition = %partition, phase = %phase.name(), reason = %reason, "phase failed");
                    report.status = PartitionStatus::Failed;
                }
            }
            let failed = matches!(result.outcome, PhaseOutcome::Failed { .. });
            report.phases.push(PhaseReport {
                phase: phase.name(),
                outcome: result.outcome,
                elapsed_ms,
                counters: result.counters,
                notes: result.notes,
            });
            if failed {
                break;
            }
        }
        info!(partition = %partition, status = ?report.status, "partition finished");
        report
    }

    fn run_phase(
        &self,
        phase: Phase,
        partition: Partition,
        files: &PartitionFiles,
        state: &mut PartitionState,
    ) -> PhaseResult {
        match phase {
            Phase::Prerequisites => {
                let missing = missing_inputs(partition, files);
                if missing.is_empty() {
                    PhaseResult::success(Counters::default())
                } else {
                    PhaseResult::failed(missing.join("; "))
                }
            }
            Phase::Parse => self.parse(partition, files, state),
            Phase::Enrich => self.enrich(partition, files, state),
            Phase::IngestTerms => self.ingest_terms(partition, files, state),
            Phase::HierarchyFromStanzas => {
                let relations = stanza_relations_for(&state.enriched);
                let op = StanzaRelationUpsert {
                    partition,
                    source_file: source_label(&files.obo),
                };
                let run = self.engine(self.config.batch_sizes.stanza_relations).run(&op, &relations);
                PhaseResult::from_runs(&[run], Counters::default())
            }
            Phase::HierarchyFromTable => self.hierarchy_table(partition, files),
            Phase::Annotations => self.annotations(partition, files, state),
            Phase::Consolidate | Phase::ConsolidateAfterCrossReference => self.consolidate(),
            Phase::CrossReference(space) => self.cross_reference(partition, files, space),
            Phase::Validate => self.validate(partition, state),
        }
    }

    fn parse(&self, partition: Partition, files: &PartitionFiles, state: &mut PartitionState) -> PhaseResult {
        let output = match read_with(&files.obo, |reader| parse_stanzas(reader, partition)) {
            Ok(output) => output,
            Err(err) => return PhaseResult::failed(err.to_string()),
        };
        for line_error in &output.errors {
            debug!(line = line_error.line, kind = ?line_error.kind, text = %line_error.text, "skipped stanza line");
        }

        let stats = output.stats;
        let mut counters = Counters::default();
        counters.add("stanzas_seen", stats.stanzas_seen);
        counters.add("terms_emitted", stats.terms_emitted);
        counters.add("skipped_other_namespace", stats.skipped_other_namespace);
        counters.add("line_errors", stats.line_errors);

        if output.terms.is_empty() {
            return PhaseResult::failed(format!(
                "no {} terms in {}",
                partition.namespace(),
                files.obo.display()
            ));
        }
        state.parsed = output.terms;
        let result = PhaseResult::success(counters);
        if stats.line_errors > 0 {
            result.with_note(format!("{} malformed lines skipped", stats.line_errors))
        } else {
            result
        }
    }

    fn enrich(&self, partition: Partition, files: &PartitionFiles, state: &mut PartitionState) -> PhaseResult {
        let tables = match ReferenceTables::load(&files.names, &files.namespaces, &files.alt_ids, partition) {
            Ok(tables) => tables,
            Err(err) => return PhaseResult::failed(err.to_string()),
        };
        let (enriched, stats) = tables.enrich_all(std::mem::take(&mut state.parsed));
        state.enriched = enriched;

        let mut counters = Counters::default();
        counters.add("reference_validated", stats.reference_validated);
        counters.add("name_corrections", stats.name_corrections);
        counters.add("reference_missing", stats.reference_missing);
        counters.add("alt_id_corrections", stats.alt_id_corrections);
        PhaseResult::success(counters)
    }

    fn ingest_terms(&self, partition: Partition, files: &PartitionFiles, state: &PartitionState) -> PhaseResult {
        let sizes = &self.config.batch_sizes;
        let terms = TermUpsert {
            partition,
            source_file: source_label(&files.obo),
            import_timestamp: now_timestamp(),
        };
        let term_run = self.engine(sizes.terms).run(&terms, &state.enriched);
        if term_run.interrupted {
            return PhaseResult::from_runs(&[term_run], Counters::default());
        }
        let mappings = alt_mappings_for(&state.enriched);
        let alt_run = self
            .engine(sizes.alt_mappings)
            .run(&AltMappingUpsert { partition }, &mappings);
        PhaseResult::from_runs(&[term_run, alt_run], Counters::default())
    }

    fn hierarchy_table(&self, partition: Partition, files: &PartitionFiles) -> PhaseResult {
        let (rows, read) = match read_with(&files.hierarchy, |reader| read_hierarchy_table(reader)) {
            Ok(parsed) => parsed,
            Err(err) => return PhaseResult::failed(err.to_string()),
        };
        let mut counters = Counters::default();
        counters.add("rows", read.rows);
        counters.add("invalid_rows", read.invalid_rows);
        let op = HierarchyTableUpsert {
            partition,
            source_file: source_label(&files.hierarchy),
        };
        let run = self.engine(self.config.batch_sizes.hierarchy).run(&op, &rows);
        PhaseResult::from_runs(&[run], counters)
    }

    fn annotations(&self, partition: Partition, files: &PartitionFiles, state: &mut PartitionState) -> PhaseResult {
        let (records, read) = match read_with(&files.annotations, |reader| read_annotations(reader, partition)) {
            Ok(parsed) => parsed,
            Err(err) => return PhaseResult::failed(err.to_string()),
        };
        let mut counters = Counters::default();
        counters.add("rows", read.rows);
        counters.add("comments", read.comments);
        counters.add("invalid_rows", read.invalid_rows);
        counters.add("other_partition", read.other_partition);
        counters.add("kept", read.kept);

        let source_file = source_label(&files.annotations);
        state.annotations_kept = read.kept;
        state.annotation_source = source_file.clone();
        let op = AnnotationUpsert {
            partition,
            source_file,
            imported_at: now_timestamp(),
        };
        let run = self.engine(self.config.batch_sizes.annotations).run(&op, &records);
        PhaseResult::from_runs(&[run], counters)
    }

    fn consolidate(&self) -> PhaseResult {
        match consolidate_genes(self.store, &self.config.consolidation_keys) {
            Ok(stats) => consolidation_result(&stats),
            Err(err) => PhaseResult::failed(err.to_string()),
        }
    }

    fn cross_reference(&self, partition: Partition, files: &PartitionFiles, space: IdSpace) -> PhaseResult {
        let path = files.collapsed(space);
        let (table, read) = match read_with(path, |reader| read_collapsed_table(reader)) {
            Ok(parsed) => parsed,
            Err(err) => return PhaseResult::failed(err.to_string()),
        };
        let mut counters = Counters::default();
        counters.add("rows", read.rows);
        counters.add("invalid_rows", read.invalid_rows);

        let source_file = source_label(path);
        let sizes = &self.config.batch_sizes;
        let hierarchy_op = CollapsedHierarchyUpsert {
            partition,
            space,
            source_file: source_file.clone(),
        };
        let hierarchy_run = self.engine(sizes.collapsed_hierarchy).run(&hierarchy_op, &table.hierarchy);
        if hierarchy_run.interrupted {
            return PhaseResult::from_runs(&[hierarchy_run], counters);
        }
        let gene_op = CollapsedGeneUpsert {
            partition,
            space,
            source_file,
            imported_at: now_timestamp(),
        };
        let gene_run = self.engine(sizes.genes(space)).run(&gene_op, &table.genes);
        PhaseResult::from_runs(&[hierarchy_run, gene_run], counters)
    }

    fn validate(&self, partition: Partition, state: &PartitionState) -> PhaseResult {
        match validation_findings(self.store, partition, state, &self.config.consolidation_keys) {
            Ok(findings) => {
                let mut counters = Counters::default();
                counters.add("findings", findings.len() as u64);
                let mut result = PhaseResult::success(counters);
                for finding in findings {
                    warn!(partition = %partition, check = finding.check, message = %finding.message, "validation finding");
                    result = result.with_note(format!("{}: {}", finding.check, finding.message));
                }
                result
            }
            Err(err) => PhaseResult {
                outcome: PhaseOutcome::PartialWithErrors {
                    errors: vec![err.to_string()],
                },
                counters: Counters::default(),
                notes: Vec::new(),
            },
        }
    }

    pub fn run_interconnect(&self) -> InterconnectOutcome {
        let engine = self.engine(self.config.batch_sizes.derived_links);
        match interconnect(self.store, &engine, &self.config.interconnect) {
            Ok(stats) => InterconnectOutcome::Completed(stats),
            Err(InterconnectError::Precondition(failures)) => {
                InterconnectOutcome::PreconditionsNotMet { failures }
            }
            Err(InterconnectError::Store(err)) => {
                error!(error = %err, "interconnector failed");
                InterconnectOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Runs each configured loader; one failing loader does not stop the rest.
    pub fn run_loaders(&self) -> Vec<LoaderOutcome> {
        let engine = self.engine(self.config.batch_sizes.loader);
        let mut outcomes = Vec::with_capacity(self.config.loaders.len());
        for spec in &self.config.loaders {
            if self.cancelled() {
                break;
            }
            let outcome = match run_loader(&engine, spec, &self.config.base_dir) {
                Ok(stats) => LoaderOutcome {
                    kind: spec.kind,
                    path: spec.path.clone(),
                    stats: Some(stats),
                    error: None,
                },
                Err(err) => {
                    error!(kind = spec.kind.as_str(), path = %spec.path, error = %err, "loader failed");
                    LoaderOutcome {
                        kind: spec.kind,
                        path: spec.path.clone(),
                        stats: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

fn missing_inputs(partition: Partition, files: &PartitionFiles) -> Vec<String> {
    files
        .all()
        .into_iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(role, path)| format!("{partition}: missing {role} input {}", path.display()))
        .collect()
}

fn consolidation_result(stats: &ConsolidationStats) -> PhaseResult {
    let mut counters = Counters::default();
    counters.add("groups", stats.groups);
    counters.add("merged", stats.merged);
    counters.add("annotations_moved", stats.annotations_moved);
    counters.add("annotations_dropped", stats.annotations_dropped);
    counters.add("entity_edges_moved", stats.entity_edges_moved);
    counters.add("entity_edges_dropped", stats.entity_edges_dropped);
    counters.add("errors", stats.errors);
    if stats.errors > 0 {
        PhaseResult {
            outcome: PhaseOutcome::PartialWithErrors {
                errors: stats.error_messages.clone(),
            },
            counters,
            notes: Vec::new(),
        }
    } else {
        PhaseResult::success(counters)
    }
}

fn validation_findings(
    store: &GraphStore,
    partition: Partition,
    state: &PartitionState,
    consolidation_keys: &[IdSpace],
) -> rusqlite::Result<Vec<ValidationFinding>> {
    let mut findings = Vec::new();

    let stored = store.term_count(Some(partition.namespace()))?;
    let ingested = state.enriched.len() as u64;
    if stored < ingested {
        findings.push(ValidationFinding {
            check: "terms",
            message: format!("{stored} terms stored, {ingested} parsed"),
        });
    }

    if state.annotations_kept > 0 {
        let linked = annotations_in_partition(store, &state.annotation_source, partition)?;
        if linked == 0 {
            findings.push(ValidationFinding {
                check: "annotations",
                message: format!(
                    "{} rows kept from {} but no annotation edges stored",
                    state.annotations_kept, state.annotation_source
                ),
            });
        }
    }

    for key in consolidation_keys {
        let column = key.column();
        let duplicates = store.count(
            &format!(
                "SELECT COUNT(*) FROM (
                     SELECT {column} FROM genes WHERE {column} IS NOT NULL
                     GROUP BY {column} HAVING COUNT(*) > 1
                 )"
            ),
            [],
        )?;
        if duplicates > 0 {
            findings.push(ValidationFinding {
                check: "gene_identity",
                message: format!("{duplicates} {} values still shared by several genes", key.as_str()),
            });
        }
    }

    let anonymous = store.count(
        "SELECT COUNT(*) FROM genes
         WHERE symbol IS NULL AND accession IS NULL AND numeric_id IS NULL",
        [],
    )?;
    if anonymous > 0 {
        findings.push(ValidationFinding {
            check: "gene_identifiers",
            message: format!("{anonymous} genes carry no identifier"),
        });
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_sequence_runs_cross_references_between_consolidations() {
        let names: Vec<String> = Phase::SEQUENCE.iter().map(Phase::name).collect();
        let first = names.iter().position(|name| name == "consolidate").expect("consolidate");
        let second = names
            .iter()
            .position(|name| name == "consolidate_after_cross_reference")
            .expect("second consolidate");
        let xrefs: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with("cross_reference:"))
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(xrefs.len(), 3);
        assert!(xrefs.iter().all(|idx| *idx > first && *idx < second));
        assert_eq!(names.first().map(String::as_str), Some("prerequisites"));
        assert_eq!(names.last().map(String::as_str), Some("validate"));
    }

    #[test]
    fn missing_inputs_abort_before_any_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::defaults(dir.path());
        let store = GraphStore::open_in_memory().expect("store");
        let pipeline = Pipeline::new(&store, &config);
        let err = pipeline
            .run(&[Partition::BiologicalProcess])
            .expect_err("missing files");
        match err {
            PipelineError::Prerequisites(problems) => assert_eq!(problems.len(), 9),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.term_count(None).expect("terms"), 0);
    }

    #[test]
    fn interrupted_batches_fail_the_phase() {
        let run = IngestStats {
            stage: "terms:biological_process".to_string(),
            interrupted: true,
            ..IngestStats::default()
        };
        let result = PhaseResult::from_runs(&[run], Counters::default());
        assert_eq!(
            result.outcome,
            PhaseOutcome::Failed {
                reason: INTERRUPTED.to_string()
            }
        );

        let failing = IngestStats {
            stage: "annotations:biological_process".to_string(),
            failed_batches: 1,
            failed_records: 2,
            errors: vec!["batch 0: FOREIGN KEY constraint failed".to_string()],
            ..IngestStats::default()
        };
        let result = PhaseResult::from_runs(&[failing], Counters::default());
        assert!(matches!(result.outcome, PhaseOutcome::PartialWithErrors { ref errors } if errors.len() == 1));
        assert_eq!(result.counters.get("annotations:biological_process.failed"), 2);
    }

    #[test]
    fn validation_flags_unmerged_symbols() {
        use crate::graph::gene::{GeneUpsert, upsert_gene};

        let store = GraphStore::open_in_memory().expect("store");
        let mut first = GeneUpsert::keyed(IdSpace::NumericId, "7157", "collapsed_go.entrez");
        first.fill.symbol = Some("TP53".to_string());
        upsert_gene(store.conn(), &first).expect("first");
        upsert_gene(store.conn(), &GeneUpsert::keyed(IdSpace::Symbol, "TP53", "collapsed_go.symbol"))
            .expect("second");

        let state = PartitionState::default();
        let findings =
            validation_findings(&store, Partition::BiologicalProcess, &state, &[IdSpace::Symbol]).expect("validate");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, "gene_identity");

        consolidate_genes(&store, &[IdSpace::Symbol]).expect("consolidate");
        let findings =
            validation_findings(&store, Partition::BiologicalProcess, &state, &[IdSpace::Symbol]).expect("validate");
        assert!(findings.is_empty());
    }
}
