use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::graph::model::Partition;
use crate::source::compress::read_input_to_string;
use crate::source::obo::ParsedTerm;

#[derive(Debug)]
pub enum ReferenceError {
    Io { path: String, source: std::io::Error },
}

impl std::fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {path}: {source}"),
        }
    }
}

impl std::error::Error for ReferenceError {}

/// Authoritative lookups for one partition.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    target: Option<Partition>,
    names: HashMap<String, String>,
    namespaces: HashMap<String, String>,
    obsolete_to_current: HashMap<String, String>,
    current_to_obsolete: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedTerm {
    pub term: ParsedTerm,
    pub reference_validated: bool,
    pub name_corrected: bool,
    /// Alternative ids contributed by the lookup table, not present in the parsed record.
    pub alt_id_additions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EnrichStats {
    pub reference_validated: u64,
    pub name_corrections: u64,
    pub reference_missing: u64,
    pub alt_id_corrections: u64,
}

impl ReferenceTables {
    pub fn load(
        names_path: &Path,
        namespaces_path: &Path,
        alt_ids_path: &Path,
        target: Partition,
    ) -> Result<Self, ReferenceError> {
        Ok(Self::from_contents(
            &read_table(names_path)?,
            &read_table(namespaces_path)?,
            &read_table(alt_ids_path)?,
            target,
        ))
    }

    pub fn from_contents(names: &str, namespaces: &str, alt_ids: &str, target: Partition) -> Self {
        let mut tables = Self {
            target: Some(target),
            ..Self::default()
        };

        for (id, name) in table_rows(names) {
            tables.names.insert(id.to_string(), name.to_string());
        }

        for (id, namespace) in table_rows(namespaces) {
            if namespace == target.namespace() {
                tables.namespaces.insert(id.to_string(), namespace.to_string());
            }
        }
        // Every remaining name key is in the target namespace.
        tables
            .names
            .retain(|id, _| tables.namespaces.contains_key(id));

        for (current, obsolete) in table_rows(alt_ids) {
            if !tables.namespaces.contains_key(current) {
                continue;
            }
            tables
                .obsolete_to_current
                .insert(obsolete.to_string(), current.to_string());
            let bucket = tables
                .current_to_obsolete
                .entry(current.to_string())
                .or_default();
            if !bucket.iter().any(|existing| existing == obsolete) {
                bucket.push(obsolete.to_string());
            }
        }

        tables
    }

    pub fn target(&self) -> Option<Partition> {
        self.target
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn current_for(&self, obsolete_id: &str) -> Option<&str> {
        self.obsolete_to_current.get(obsolete_id).map(String::as_str)
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn alt_id_count(&self) -> usize {
        self.obsolete_to_current.len()
    }

    pub fn enrich(&self, mut term: ParsedTerm, stats: &mut EnrichStats) -> EnrichedTerm {
        let mut name_corrected = false;
        let reference_validated = match self.names.get(&term.id) {
            Some(reference_name) => {
                if !term.name.is_empty() && term.name != *reference_name {
                    debug!(
                        term = %term.id,
                        parsed = %term.name,
                        reference = %reference_name,
                        "name corrected from reference table"
                    );
                    name_corrected = true;
                    stats.name_corrections += 1;
                }
                term.name = reference_name.clone();
                stats.reference_validated += 1;
                true
            }
            None => {
                stats.reference_missing += 1;
                false
            }
        };

        let mut alt_id_additions = Vec::new();
        if let Some(reference_alts) = self.current_to_obsolete.get(&term.id) {
            let parsed: BTreeSet<&str> = term.alt_ids.iter().map(String::as_str).collect();
            for alt in reference_alts {
                if !parsed.contains(alt.as_str()) {
                    alt_id_additions.push(alt.clone());
                }
            }
        }
        if !alt_id_additions.is_empty() {
            stats.alt_id_corrections += 1;
            term.alt_ids.extend(alt_id_additions.iter().cloned());
        }

        EnrichedTerm {
            term,
            reference_validated,
            name_corrected,
            alt_id_additions,
        }
    }

    pub fn enrich_all(&self, terms: Vec<ParsedTerm>) -> (Vec<EnrichedTerm>, EnrichStats) {
        let mut stats = EnrichStats::default();
        let enriched = terms
            .into_iter()
            .map(|term| self.enrich(term, &mut stats))
            .collect();
        (enriched, stats)
    }
}

fn read_table(path: &Path) -> Result<String, ReferenceError> {
    read_input_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Data rows after the header, split on the first tab. Rows without a tab are dropped.
fn table_rows(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once('\t'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: &str = "go_id\tname\nGO:1\tcell death\nGO:2\tnucleus\nGO:3\tcell growth\tsecond tab kept\n";
    const NAMESPACES: &str =
        "go_id\tnamespace\nGO:1\tbiological_process\nGO:2\tcellular_component\nGO:3\tbiological_process\n";
    const ALT_IDS: &str = "go_id\talt_id\nGO:1\tGO:100\nGO:1\tGO:101\nGO:2\tGO:200\n";

    fn term(id: &str, name: &str, alt_ids: &[&str]) -> ParsedTerm {
        ParsedTerm {
            id: id.to_string(),
            name: name.to_string(),
            namespace: "biological_process".to_string(),
            alt_ids: alt_ids.iter().map(|value| value.to_string()).collect(),
            ..ParsedTerm::default()
        }
    }

    #[test]
    fn name_map_is_restricted_to_target_namespace() {
        let tables = ReferenceTables::from_contents(
            NAMES,
            NAMESPACES,
            ALT_IDS,
            Partition::BiologicalProcess,
        );
        assert_eq!(tables.name("GO:1"), Some("cell death"));
        assert_eq!(tables.name("GO:2"), None);
        assert_eq!(tables.name("GO:3"), Some("cell growth\tsecond tab kept"));
        assert_eq!(tables.current_for("GO:100"), Some("GO:1"));
        assert_eq!(tables.current_for("GO:200"), None);
    }

    #[test]
    fn enrich_overrides_name_and_tracks_alt_id_additions() {
        let tables = ReferenceTables::from_contents(
            NAMES,
            NAMESPACES,
            ALT_IDS,
            Partition::BiologicalProcess,
        );
        let mut stats = EnrichStats::default();
        let enriched = tables.enrich(term("GO:1", "programmed death", &["GO:100"]), &mut stats);

        assert_eq!(enriched.term.name, "cell death");
        assert!(enriched.reference_validated);
        assert!(enriched.name_corrected);
        assert_eq!(enriched.term.alt_ids, vec!["GO:100", "GO:101"]);
        assert_eq!(enriched.alt_id_additions, vec!["GO:101"]);
        assert_eq!(stats.name_corrections, 1);
        assert_eq!(stats.alt_id_corrections, 1);
    }

    #[test]
    fn missing_reference_entry_keeps_parsed_values() {
        let tables = ReferenceTables::from_contents(
            NAMES,
            NAMESPACES,
            ALT_IDS,
            Partition::BiologicalProcess,
        );
        let (enriched, stats) = tables.enrich_all(vec![
            term("GO:9", "unlisted process", &[]),
            term("GO:3", "cell growth\tsecond tab kept", &[]),
        ]);

        assert_eq!(enriched[0].term.name, "unlisted process");
        assert!(!enriched[0].reference_validated);
        assert!(!enriched[0].name_corrected);
        assert!(enriched[1].reference_validated);
        assert!(!enriched[1].name_corrected);
        assert_eq!(stats.reference_missing, 1);
        assert_eq!(stats.reference_validated, 1);
        assert_eq!(stats.name_corrections, 0);
    }
}
