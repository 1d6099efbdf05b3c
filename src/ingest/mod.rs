//! Batched, idempotent upserts with per-batch transactions and resume.
//!
//! Every stage hands the engine a full record list and an [`UpsertOp`]. Records
//! are applied in fixed-size batches, each inside its own transaction. A batch
//! that fails is rolled back, logged and counted, and the engine moves on.

pub mod annotations;
pub mod hierarchy;
pub mod terms;
pub mod xref;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::graph::GraphStore;

/// Counter for records skipped because a term they reference is absent.
pub const MISSING_TERMS: &str = "missing_terms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Skip batches whose content hash was already committed for the stage.
    #[default]
    Checkpoint,
    /// Skip as many leading records as the store already holds edges for.
    EdgeCount,
    Off,
}

impl ResumePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "checkpoint" => Some(Self::Checkpoint),
            "edge_count" => Some(Self::EdgeCount),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Named tallies reported by an operation, e.g. `created` or `missing_terms`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Counters(BTreeMap<String, u64>);

impl Counters {
    pub fn add(&mut self, key: &str, n: u64) {
        if n == 0 {
            self.0.entry(key.to_string()).or_insert(0);
            return;
        }
        *self.0.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn incr(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &Counters) {
        for (key, value) in &other.0 {
            self.add(key, *value);
        }
    }

    pub fn merge_prefixed(&mut self, prefix: &str, other: &Counters) {
        for (key, value) in &other.0 {
            self.add(&format!("{prefix}.{key}"), *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IngestStats {
    pub stage: String,
    pub total_records: u64,
    pub applied_records: u64,
    pub resumed_records: u64,
    pub batches: u64,
    pub committed_batches: u64,
    pub skipped_batches: u64,
    pub failed_batches: u64,
    pub failed_records: u64,
    /// Committed without a checkpoint because some records were deferred.
    pub unconfirmed_batches: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub counters: Counters,
    pub interrupted: bool,
}

impl IngestStats {
    fn new(stage: &str, total: usize) -> Self {
        Self {
            stage: stage.to_string(),
            total_records: total as u64,
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.failed_batches > 0
    }
}

/// One idempotent, create-or-match-then-set operation over a record type.
pub trait UpsertOp {
    type Record: Serialize;

    /// Stage name used for logging and checkpoint keys.
    fn stage(&self) -> String;

    /// Applies one batch inside `tx`. Any error rolls back the whole batch.
    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[Self::Record],
        counters: &mut Counters,
    ) -> rusqlite::Result<()>;

    /// Feeds the record's canonical encoding into the batch fingerprint.
    fn fingerprint(&self, record: &Self::Record, hasher: &mut Sha256) {
        if let Ok(bytes) = serde_json::to_vec(record) {
            hasher.update(&bytes);
        }
    }

    /// Whether a committed batch may be checkpointed. Batches that skipped
    /// records for missing terms stay open so a later run can fill them in.
    fn checkpointable(&self, counters: &Counters) -> bool {
        counters.get(MISSING_TERMS) == 0
    }

    /// Records already ingested by a previous run, for count-based resume.
    fn resume_count(&self, _store: &GraphStore) -> rusqlite::Result<Option<u64>> {
        Ok(None)
    }
}

pub struct BatchEngine<'a> {
    store: &'a GraphStore,
    batch_size: usize,
    resume: ResumePolicy,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> BatchEngine<'a> {
    pub fn new(store: &'a GraphStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            resume: ResumePolicy::default(),
            cancel: None,
        }
    }

    pub fn with_resume(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_cancel(mut self, cancel: Option<&'a AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run<O: UpsertOp>(&self, op: &O, records: &[O::Record]) -> IngestStats {
        let stage = op.stage();
        let mut stats = IngestStats::new(&stage, records.len());

        let start = match self.resume {
            ResumePolicy::EdgeCount => match op.resume_count(self.store) {
                Ok(Some(done)) => {
                    let done = usize::try_from(done).unwrap_or(usize::MAX).min(records.len());
                    if done > 0 {
                        info!(stage = %stage, skipped = done, "resuming after previously ingested records");
                    }
                    done
                }
                Ok(None) => 0,
                Err(err) => {
                    warn!(stage = %stage, error = %err, "resume count unavailable; starting from the first record");
                    0
                }
            },
            ResumePolicy::Checkpoint | ResumePolicy::Off => 0,
        };
        stats.resumed_records = start as u64;

        for (idx, batch) in records[start..].chunks(self.batch_size).enumerate() {
            if self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                warn!(stage = %stage, batch = idx, "interrupted; stopping before next batch");
                stats.interrupted = true;
                break;
            }
            stats.batches += 1;

            let hash = match self.resume {
                ResumePolicy::Checkpoint => Some(batch_fingerprint(op, &stage, batch)),
                ResumePolicy::EdgeCount | ResumePolicy::Off => None,
            };

            let mut batch_counters = Counters::default();
            match self.apply_batch(op, &stage, batch, hash.as_deref(), &mut batch_counters) {
                Ok(BatchResult::Committed { checkpointed }) => {
                    stats.committed_batches += 1;
                    if hash.is_some() && !checkpointed {
                        stats.unconfirmed_batches += 1;
                        debug!(stage = %stage, batch = idx, "batch left without checkpoint");
                    }
                    stats.applied_records += batch.len() as u64;
                    stats.counters.merge(&batch_counters);
                    debug!(stage = %stage, batch = idx, records = batch.len(), "batch committed");
                }
                Ok(BatchResult::AlreadyCommitted) => {
                    stats.skipped_batches += 1;
                    stats.resumed_records += batch.len() as u64;
                    debug!(stage = %stage, batch = idx, "batch checkpoint found; skipped");
                }
                Err(err) => {
                    error!(stage = %stage, batch = idx, records = batch.len(), error = %err, "batch failed");
                    stats.failed_batches += 1;
                    stats.failed_records += batch.len() as u64;
                    stats.errors.push(format!("batch {idx}: {err}"));
                }
            }
        }

        info!(
            stage = %stage,
            total = stats.total_records,
            applied = stats.applied_records,
            resumed = stats.resumed_records,
            failed_batches = stats.failed_batches,
            "stage complete"
        );
        stats
    }

    fn apply_batch<O: UpsertOp>(
        &self,
        op: &O,
        stage: &str,
        batch: &[O::Record],
        hash: Option<&str>,
        counters: &mut Counters,
    ) -> rusqlite::Result<BatchResult> {
        let tx = self.store.conn().unchecked_transaction()?;
        if let Some(hash) = hash
            && GraphStore::has_checkpoint(&tx, stage, hash)?
        {
            return Ok(BatchResult::AlreadyCommitted);
        }
        op.apply(&tx, batch, counters)?;
        let checkpointed = match hash {
            Some(hash) if op.checkpointable(counters) => {
                GraphStore::record_checkpoint(&tx, stage, hash, batch.len())?;
                true
            }
            _ => false,
        };
        tx.commit()?;
        Ok(BatchResult::Committed { checkpointed })
    }
}

enum BatchResult {
    Committed { checkpointed: bool },
    AlreadyCommitted,
}

pub fn batch_fingerprint<O: UpsertOp>(op: &O, stage: &str, batch: &[O::Record]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_bytes());
    hasher.update([0u8]);
    for record in batch {
        op.fingerprint(record, &mut hasher);
        hasher.update(b"\n");
    }
    hex_digest(&hasher.finalize())
}

pub fn hex_digest(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    /// Inserts each value into a scratch table; fails on `poison`. A value
    /// `needs:x` is deferred as a missing term until `x` is present.
    struct ScratchOp;

    impl UpsertOp for ScratchOp {
        type Record = String;

        fn stage(&self) -> String {
            "scratch".to_string()
        }

        fn apply(
            &self,
            tx: &Transaction<'_>,
            batch: &[String],
            counters: &mut Counters,
        ) -> rusqlite::Result<()> {
            for value in batch {
                if value == "poison" {
                    return Err(rusqlite::Error::InvalidParameterName("poison".to_string()));
                }
                if let Some(dep) = value.strip_prefix("needs:") {
                    let present = tx
                        .prepare_cached("SELECT 1 FROM scratch WHERE value = ?1")?
                        .exists(params![dep])?;
                    if !present {
                        counters.incr(MISSING_TERMS);
                        continue;
                    }
                }
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO scratch (value) VALUES (?1)",
                    params![value],
                )?;
                counters.add("created", changed as u64);
            }
            Ok(())
        }

        fn resume_count(&self, store: &GraphStore) -> rusqlite::Result<Option<u64>> {
            store.count("SELECT COUNT(*) FROM scratch", []).map(Some)
        }
    }

    fn scratch_store() -> GraphStore {
        let store = GraphStore::open_in_memory().expect("store");
        store
            .conn()
            .execute_batch("CREATE TABLE scratch (value TEXT PRIMARY KEY);")
            .expect("scratch table");
        store
    }

    fn records(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn scratch_count(store: &GraphStore) -> u64 {
        store.count("SELECT COUNT(*) FROM scratch", []).expect("count")
    }

    #[test]
    fn failed_batch_rolls_back_and_later_batches_commit() {
        let store = scratch_store();
        let engine = BatchEngine::new(&store, 2).with_resume(ResumePolicy::Off);
        let stats = engine.run(&ScratchOp, &records(&["a", "b", "c", "poison", "d", "e"]));

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.committed_batches, 2);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.failed_records, 2);
        assert_eq!(stats.counters.get("created"), 4);
        assert!(stats.has_errors());
        assert_eq!(scratch_count(&store), 4);
    }

    #[test]
    fn checkpoint_resume_skips_committed_batches() {
        let store = scratch_store();
        let engine = BatchEngine::new(&store, 2);
        let first = engine.run(&ScratchOp, &records(&["a", "b", "c"]));
        assert_eq!(first.committed_batches, 2);

        store
            .conn()
            .execute("DELETE FROM scratch WHERE value = 'a'", [])
            .expect("delete");
        let second = engine.run(&ScratchOp, &records(&["a", "b", "c", "d"]));
        assert_eq!(second.skipped_batches, 1);
        assert_eq!(second.resumed_records, 2);
        assert_eq!(second.committed_batches, 1);
        // The first batch was trusted from its checkpoint and not re-applied.
        assert_eq!(scratch_count(&store), 3);
    }

    #[test]
    fn batch_with_missing_terms_is_reapplied_once_they_exist() {
        let store = scratch_store();
        let engine = BatchEngine::new(&store, 10);
        let first = engine.run(&ScratchOp, &records(&["a", "needs:z"]));
        assert_eq!(first.committed_batches, 1);
        assert_eq!(first.unconfirmed_batches, 1);
        assert_eq!(first.counters.get(MISSING_TERMS), 1);
        assert!(store.checkpoints(Some("scratch")).expect("list").is_empty());

        store
            .conn()
            .execute("INSERT INTO scratch (value) VALUES ('z')", [])
            .expect("dependency");
        let second = engine.run(&ScratchOp, &records(&["a", "needs:z"]));
        assert_eq!(second.skipped_batches, 0);
        assert_eq!(second.committed_batches, 1);
        assert_eq!(second.unconfirmed_batches, 0);
        assert_eq!(second.counters.get("created"), 1);
        assert_eq!(scratch_count(&store), 3);
        assert_eq!(store.checkpoints(Some("scratch")).expect("list").len(), 1);

        let third = engine.run(&ScratchOp, &records(&["a", "needs:z"]));
        assert_eq!(third.skipped_batches, 1);
    }

    #[test]
    fn failed_batch_leaves_no_checkpoint() {
        let store = scratch_store();
        let engine = BatchEngine::new(&store, 10);
        let stats = engine.run(&ScratchOp, &records(&["a", "poison"]));
        assert_eq!(stats.failed_batches, 1);
        assert!(store.checkpoints(Some("scratch")).expect("list").is_empty());

        let retry = engine.run(&ScratchOp, &records(&["a", "b"]));
        assert_eq!(retry.committed_batches, 1);
        assert_eq!(scratch_count(&store), 2);
    }

    #[test]
    fn edge_count_resume_skips_leading_records() {
        let store = scratch_store();
        let engine = BatchEngine::new(&store, 2).with_resume(ResumePolicy::EdgeCount);
        engine.run(&ScratchOp, &records(&["a", "b"]));

        let stats = engine.run(&ScratchOp, &records(&["a", "b", "c"]));
        assert_eq!(stats.resumed_records, 2);
        assert_eq!(stats.applied_records, 1);
        assert_eq!(stats.counters.get("created"), 1);
    }

    #[test]
    fn cancel_flag_stops_between_batches() {
        let store = scratch_store();
        let cancel = AtomicBool::new(true);
        let engine = BatchEngine::new(&store, 1)
            .with_resume(ResumePolicy::Off)
            .with_cancel(Some(&cancel));
        let stats = engine.run(&ScratchOp, &records(&["a", "b"]));
        assert!(stats.interrupted);
        assert_eq!(stats.batches, 0);
        assert_eq!(scratch_count(&store), 0);
    }

    #[test]
    fn fingerprint_depends_on_stage_and_content() {
        let a = batch_fingerprint(&ScratchOp, "s1", &records(&["x"]));
        let b = batch_fingerprint(&ScratchOp, "s2", &records(&["x"]));
        let c = batch_fingerprint(&ScratchOp, "s1", &records(&["y"]));
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, batch_fingerprint(&ScratchOp, "s1", &records(&["x"])));
    }
}
