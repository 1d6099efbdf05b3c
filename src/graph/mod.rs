pub mod gene;
pub mod model;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::graph::model::{
    AnnotationRow, ConfidenceTier, DerivedLinkRow, GeneRow, HierarchyEdgeRow, Synonym, TermRow,
    decode_hierarchy_kind,
};

const SCHEMA_VERSION: i64 = 1;

pub struct GraphStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub stage: String,
    pub batch_hash: String,
    pub records: u64,
    pub committed_at: String,
}

impl GraphStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Round-trips a trivial query; used as the reachability prerequisite.
    pub fn ping(&self) -> rusqlite::Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                self.create_schema_v1()?;
                self.conn
                    .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            }
            SCHEMA_VERSION => self.create_schema_v1()?,
            _ => return Err(rusqlite::Error::InvalidQuery),
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS terms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                definition TEXT,
                definition_refs TEXT NOT NULL DEFAULT '[]',
                is_obsolete INTEGER NOT NULL DEFAULT 0 CHECK (is_obsolete IN (0, 1)),
                synonyms TEXT NOT NULL DEFAULT '[]',
                alt_ids TEXT NOT NULL DEFAULT '[]',
                alt_id_additions TEXT NOT NULL DEFAULT '[]',
                subsets TEXT NOT NULL DEFAULT '[]',
                xrefs TEXT NOT NULL DEFAULT '[]',
                comment TEXT,
                replaced_by TEXT NOT NULL DEFAULT '[]',
                consider TEXT NOT NULL DEFAULT '[]',
                created_by TEXT,
                creation_date TEXT,
                source_file TEXT NOT NULL,
                import_timestamp TEXT NOT NULL,
                reference_validated INTEGER NOT NULL DEFAULT 0,
                name_corrected INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_terms_namespace ON terms(namespace);

            CREATE TABLE IF NOT EXISTS alt_mappings (
                obsolete_id TEXT NOT NULL,
                current_id TEXT NOT NULL REFERENCES terms(id),
                origin TEXT NOT NULL,
                UNIQUE(obsolete_id, current_id)
            );

            CREATE TABLE IF NOT EXISTS hierarchy_edges (
                child TEXT NOT NULL REFERENCES terms(id),
                parent TEXT NOT NULL REFERENCES terms(id),
                kind TEXT NOT NULL,
                raw_label TEXT NOT NULL DEFAULT '',
                source_file TEXT NOT NULL,
                cross_validated INTEGER NOT NULL DEFAULT 0 CHECK (cross_validated IN (0, 1)),
                created_at TEXT NOT NULL,
                validated_at TEXT,
                UNIQUE(child, parent, kind, raw_label, source_file)
            );

            CREATE INDEX IF NOT EXISTS idx_hierarchy_pair ON hierarchy_edges(child, parent);
            CREATE INDEX IF NOT EXISTS idx_hierarchy_source ON hierarchy_edges(source_file);

            CREATE TABLE IF NOT EXISTS genes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT,
                name TEXT,
                accession TEXT,
                numeric_id TEXT,
                taxon TEXT,
                db_source TEXT,
                id_type TEXT NOT NULL,
                synonyms TEXT NOT NULL DEFAULT '[]',
                source_files TEXT NOT NULL DEFAULT '[]',
                consolidated INTEGER NOT NULL DEFAULT 0 CHECK (consolidated IN (0, 1)),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_genes_symbol ON genes(symbol);
            CREATE INDEX IF NOT EXISTS idx_genes_accession ON genes(accession);
            CREATE INDEX IF NOT EXISTS idx_genes_numeric_id ON genes(numeric_id);

            CREATE TABLE IF NOT EXISTS annotations (
                gene_id INTEGER NOT NULL REFERENCES genes(id),
                term_id TEXT NOT NULL REFERENCES terms(id),
                evidence_code TEXT NOT NULL,
                qualifier TEXT NOT NULL,
                reference TEXT NOT NULL DEFAULT '',
                assigned_by TEXT NOT NULL DEFAULT '',
                annotation_date TEXT NOT NULL DEFAULT '',
                source_file TEXT NOT NULL,
                imported_at TEXT NOT NULL,
                UNIQUE(gene_id, term_id, evidence_code, qualifier, source_file)
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_term ON annotations(term_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_source ON annotations(source_file);

            CREATE TABLE IF NOT EXISTS derived_links (
                from_term TEXT NOT NULL REFERENCES terms(id),
                to_term TEXT NOT NULL REFERENCES terms(id),
                relation TEXT NOT NULL,
                shared_genes INTEGER NOT NULL,
                confidence TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(from_term, to_term, relation)
            );

            CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                attributes TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(kind, name)
            );

            CREATE TABLE IF NOT EXISTS gene_entity_edges (
                gene_id INTEGER NOT NULL REFERENCES genes(id),
                entity_kind TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                relation TEXT NOT NULL,
                weight REAL,
                source_desc TEXT NOT NULL DEFAULT '',
                source_file TEXT NOT NULL,
                UNIQUE(gene_id, entity_kind, entity_name, relation, source_file)
            );

            CREATE INDEX IF NOT EXISTS idx_gene_entity_gene ON gene_entity_edges(gene_id);

            CREATE TABLE IF NOT EXISTS entity_edges (
                parent_kind TEXT NOT NULL,
                parent_name TEXT NOT NULL,
                child_kind TEXT NOT NULL,
                child_name TEXT NOT NULL,
                relation TEXT NOT NULL,
                source_file TEXT NOT NULL,
                UNIQUE(parent_kind, parent_name, child_kind, child_name, relation, source_file)
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                stage TEXT NOT NULL,
                batch_hash TEXT NOT NULL,
                records INTEGER NOT NULL,
                committed_at TEXT NOT NULL,
                UNIQUE(stage, batch_hash)
            );
            ",
        )?;
        Ok(())
    }

    pub fn term_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
        let mut stmt = conn.prepare_cached("SELECT 1 FROM terms WHERE id = ?1")?;
        stmt.exists(params![id])
    }

    pub fn term(&self, id: &str) -> rusqlite::Result<Option<TermRow>> {
        self.conn
            .query_row(
                "SELECT id, name, namespace, definition, is_obsolete, synonyms, alt_ids,
                        alt_id_additions, source_file, reference_validated, name_corrected
                 FROM terms WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TermRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        namespace: row.get(2)?,
                        definition: row.get(3)?,
                        is_obsolete: row.get::<_, i64>(4)? != 0,
                        synonyms: decode_json_list::<Synonym>(&row.get::<_, String>(5)?),
                        alt_ids: decode_json_list(&row.get::<_, String>(6)?),
                        alt_id_additions: decode_json_list(&row.get::<_, String>(7)?),
                        source_file: row.get(8)?,
                        reference_validated: row.get::<_, i64>(9)? != 0,
                        name_corrected: row.get::<_, i64>(10)? != 0,
                    })
                },
            )
            .optional()
    }

    pub fn term_count(&self, namespace: Option<&str>) -> rusqlite::Result<u64> {
        match namespace {
            Some(namespace) => self.count(
                "SELECT COUNT(*) FROM terms WHERE namespace = ?1",
                params![namespace],
            ),
            None => self.count("SELECT COUNT(*) FROM terms", []),
        }
    }

    pub fn gene_count(&self) -> rusqlite::Result<u64> {
        self.count("SELECT COUNT(*) FROM genes", [])
    }

    pub fn annotation_count(&self) -> rusqlite::Result<u64> {
        self.count("SELECT COUNT(*) FROM annotations", [])
    }

    pub fn hierarchy_edge_count(&self) -> rusqlite::Result<u64> {
        self.count("SELECT COUNT(*) FROM hierarchy_edges", [])
    }

    pub fn derived_link_count(&self) -> rusqlite::Result<u64> {
        self.count("SELECT COUNT(*) FROM derived_links", [])
    }

    pub fn alt_mapping_count(&self) -> rusqlite::Result<u64> {
        self.count("SELECT COUNT(*) FROM alt_mappings", [])
    }

    pub(crate) fn count<P: rusqlite::Params>(&self, sql: &str, params: P) -> rusqlite::Result<u64> {
        let value: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(u64::try_from(value).unwrap_or(0))
    }

    /// Rows grouped by a single text column, e.g. edge kind or entity kind.
    pub(crate) fn grouped_counts(&self, sql: &str) -> rusqlite::Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: i64 = row.get(1)?;
            out.insert(key, u64::try_from(value).unwrap_or(0));
        }
        Ok(out)
    }

    pub fn gene(&self, id: i64) -> rusqlite::Result<Option<GeneRow>> {
        gene::load_gene(&self.conn, id)
    }

    pub fn genes(&self) -> rusqlite::Result<Vec<GeneRow>> {
        let mut stmt = self.conn.prepare("SELECT id FROM genes ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(gene) = gene::load_gene(&self.conn, id)? {
                out.push(gene);
            }
        }
        Ok(out)
    }

    pub fn hierarchy_edges_for_child(&self, child: &str) -> rusqlite::Result<Vec<HierarchyEdgeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT child, parent, kind, raw_label, source_file, cross_validated
             FROM hierarchy_edges
             WHERE child = ?1
             ORDER BY parent ASC, kind ASC, source_file ASC",
        )?;
        let mut rows = stmt.query(params![child])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(HierarchyEdgeRow {
                child: row.get(0)?,
                parent: row.get(1)?,
                kind: decode_hierarchy_kind(&row.get::<_, String>(2)?, &row.get::<_, String>(3)?),
                source_file: row.get(4)?,
                cross_validated: row.get::<_, i64>(5)? != 0,
            });
        }
        Ok(out)
    }

    pub fn annotations_for_gene(&self, gene_id: i64) -> rusqlite::Result<Vec<AnnotationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT gene_id, term_id, evidence_code, qualifier, source_file
             FROM annotations
             WHERE gene_id = ?1
             ORDER BY term_id ASC, source_file ASC, evidence_code ASC",
        )?;
        let mut rows = stmt.query(params![gene_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(AnnotationRow {
                gene_id: row.get(0)?,
                term_id: row.get(1)?,
                evidence_code: row.get(2)?,
                qualifier: row.get(3)?,
                source_file: row.get(4)?,
            });
        }
        Ok(out)
    }

    pub fn derived_links(&self) -> rusqlite::Result<Vec<DerivedLinkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT from_term, to_term, relation, shared_genes, confidence, created_by
             FROM derived_links
             ORDER BY relation ASC, from_term ASC, to_term ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let confidence: String = row.get(4)?;
            out.push(DerivedLinkRow {
                from_term: row.get(0)?,
                to_term: row.get(1)?,
                relation: row.get(2)?,
                shared_genes: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                confidence: ConfidenceTier::parse(&confidence).unwrap_or(ConfidenceTier::Low),
                created_by: row.get(5)?,
            });
        }
        Ok(out)
    }

    pub fn has_checkpoint(conn: &Connection, stage: &str, batch_hash: &str) -> rusqlite::Result<bool> {
        let mut stmt =
            conn.prepare_cached("SELECT 1 FROM checkpoints WHERE stage = ?1 AND batch_hash = ?2")?;
        stmt.exists(params![stage, batch_hash])
    }

    pub fn record_checkpoint(
        conn: &Connection,
        stage: &str,
        batch_hash: &str,
        records: usize,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO checkpoints (stage, batch_hash, records, committed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![stage, batch_hash, records as i64, now_timestamp()],
        )?;
        Ok(())
    }

    pub fn checkpoints(&self, stage: Option<&str>) -> rusqlite::Result<Vec<CheckpointRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, batch_hash, records, committed_at
             FROM checkpoints
             WHERE ?1 IS NULL OR stage = ?1
             ORDER BY stage ASC, committed_at ASC, batch_hash ASC",
        )?;
        let mut rows = stmt.query(params![stage])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CheckpointRow {
                stage: row.get(0)?,
                batch_hash: row.get(1)?,
                records: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                committed_at: row.get(3)?,
            });
        }
        Ok(out)
    }

    pub fn clear_checkpoints(&self, stage: Option<&str>) -> rusqlite::Result<usize> {
        self.conn.execute(
            "DELETE FROM checkpoints WHERE ?1 IS NULL OR stage = ?1",
            params![stage],
        )
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn encode_json_list<T: serde::Serialize>(values: &[T]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn decode_json_list<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_and_reopens_at_current_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("graph.sqlite");
        {
            let store = GraphStore::open(&path).expect("open store");
            store.ping().expect("ping");
        }
        let store = GraphStore::open(&path).expect("reopen store");
        let version: i64 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, SCHEMA_VERSION);
        assert_eq!(store.term_count(None).expect("count"), 0);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("graph.sqlite");
        {
            let conn = Connection::open(&path).expect("raw open");
            conn.execute_batch("PRAGMA user_version = 9;").expect("bump version");
        }
        assert!(GraphStore::open(&path).is_err());
    }

    #[test]
    fn checkpoints_are_unique_per_stage_and_clearable() {
        let store = GraphStore::open_in_memory().expect("store");
        GraphStore::record_checkpoint(store.conn(), "terms:bp", "abc", 10).expect("record");
        GraphStore::record_checkpoint(store.conn(), "terms:bp", "abc", 10).expect("record again");
        GraphStore::record_checkpoint(store.conn(), "terms:cc", "abc", 4).expect("record other");

        assert!(GraphStore::has_checkpoint(store.conn(), "terms:bp", "abc").expect("lookup"));
        assert!(!GraphStore::has_checkpoint(store.conn(), "terms:mf", "abc").expect("lookup"));
        assert_eq!(store.checkpoints(None).expect("list").len(), 2);
        assert_eq!(store.checkpoints(Some("terms:cc")).expect("list")[0].records, 4);

        assert_eq!(store.clear_checkpoints(Some("terms:bp")).expect("clear"), 1);
        assert_eq!(store.checkpoints(None).expect("list").len(), 1);
    }
}
