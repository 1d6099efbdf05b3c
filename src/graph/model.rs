use serde::{Deserialize, Serialize};

pub const MIN_SHARED_GENES_DEFAULT: u64 = 3;
pub const MEDIUM_CONFIDENCE_THRESHOLD: u64 = 10;
pub const HIGH_CONFIDENCE_THRESHOLD: u64 = 50;

pub const COLLAPSED_EVIDENCE: &str = "COLLAPSED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    BiologicalProcess,
    CellularComponent,
    MolecularFunction,
}

impl Partition {
    pub const ALL: [Partition; 3] = [
        Partition::BiologicalProcess,
        Partition::CellularComponent,
        Partition::MolecularFunction,
    ];

    pub const fn namespace(self) -> &'static str {
        match self {
            Self::BiologicalProcess => "biological_process",
            Self::CellularComponent => "cellular_component",
            Self::MolecularFunction => "molecular_function",
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::BiologicalProcess => "bp",
            Self::CellularComponent => "cc",
            Self::MolecularFunction => "mf",
        }
    }

    /// Single-letter aspect used in annotation files.
    pub const fn aspect(self) -> &'static str {
        match self {
            Self::BiologicalProcess => "P",
            Self::CellularComponent => "C",
            Self::MolecularFunction => "F",
        }
    }

    /// Qualifier that marks a direct annotation into this partition.
    pub const fn qualifier(self) -> &'static str {
        match self {
            Self::BiologicalProcess => "involved_in",
            Self::CellularComponent => "located_in",
            Self::MolecularFunction => "enables",
        }
    }

    pub const fn default_data_dir(self) -> &'static str {
        match self {
            Self::BiologicalProcess => "GO_BP",
            Self::CellularComponent => "GO_CC",
            Self::MolecularFunction => "GO_MF",
        }
    }

    pub fn from_namespace(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|partition| partition.namespace() == raw)
    }

    /// Accepts the namespace, the short code, or the aspect letter.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|partition| {
            partition.namespace() == normalized
                || partition.code() == normalized
                || partition.aspect().eq_ignore_ascii_case(&normalized)
        })
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Typed relation between two terms. Unknown relation labels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    IsA,
    PartOf,
    Regulates,
    NegativelyRegulates,
    PositivelyRegulates,
    Other(String),
}

impl RelationKind {
    pub fn from_label(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "is_a" | "isa" => Self::IsA,
            "part_of" => Self::PartOf,
            "regulates" => Self::Regulates,
            "negatively_regulates" => Self::NegativelyRegulates,
            "positively_regulates" => Self::PositivelyRegulates,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::IsA => "is_a",
            Self::PartOf => "part_of",
            Self::Regulates => "regulates",
            Self::NegativelyRegulates => "negatively_regulates",
            Self::PositivelyRegulates => "positively_regulates",
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HierarchyKind {
    Relation(RelationKind),
    Collapsed,
}

pub const COLLAPSED_KIND: &str = "collapsed_hierarchy";
const OTHER_KIND: &str = "other";

/// Stored as `(kind, raw_label)`; `raw_label` is empty for closed kinds.
pub fn encode_hierarchy_kind(kind: &HierarchyKind) -> (&'static str, &str) {
    match kind {
        HierarchyKind::Collapsed => (COLLAPSED_KIND, ""),
        HierarchyKind::Relation(RelationKind::IsA) => ("is_a", ""),
        HierarchyKind::Relation(RelationKind::PartOf) => ("part_of", ""),
        HierarchyKind::Relation(RelationKind::Regulates) => ("regulates", ""),
        HierarchyKind::Relation(RelationKind::NegativelyRegulates) => ("negatively_regulates", ""),
        HierarchyKind::Relation(RelationKind::PositivelyRegulates) => ("positively_regulates", ""),
        HierarchyKind::Relation(RelationKind::Other(raw)) => (OTHER_KIND, raw.as_str()),
    }
}

pub fn decode_hierarchy_kind(kind: &str, raw_label: &str) -> HierarchyKind {
    match kind {
        COLLAPSED_KIND => HierarchyKind::Collapsed,
        OTHER_KIND => HierarchyKind::Relation(RelationKind::Other(raw_label.to_string())),
        known => HierarchyKind::Relation(RelationKind::from_label(known)),
    }
}

/// Identifier space a gene record was keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    NumericId,
    Symbol,
    Accession,
}

impl IdSpace {
    pub const ALL: [IdSpace; 3] = [IdSpace::NumericId, IdSpace::Symbol, IdSpace::Accession];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NumericId => "numeric_id",
            Self::Symbol => "symbol",
            Self::Accession => "accession",
        }
    }

    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::NumericId => "numeric_id",
            Self::Symbol => "symbol",
            Self::Accession => "accession",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "numeric_id" | "numeric" | "entrez" => Some(Self::NumericId),
            "symbol" => Some(Self::Symbol),
            "accession" | "uniprot" => Some(Self::Accession),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    pub medium: u64,
    pub high: u64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: MEDIUM_CONFIDENCE_THRESHOLD,
            high: HIGH_CONFIDENCE_THRESHOLD,
        }
    }
}

pub fn confidence_tier(shared_genes: u64, thresholds: TierThresholds) -> ConfidenceTier {
    if shared_genes >= thresholds.high {
        ConfidenceTier::High
    } else if shared_genes >= thresholds.medium {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedRelation {
    OccursIn,
    EnabledBy,
    HostsFunction,
}

impl DerivedRelation {
    pub const ALL: [DerivedRelation; 3] = [
        DerivedRelation::OccursIn,
        DerivedRelation::EnabledBy,
        DerivedRelation::HostsFunction,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OccursIn => "occurs_in",
            Self::EnabledBy => "enabled_by",
            Self::HostsFunction => "hosts_function",
        }
    }

    /// Ordered `(from, to)` partitions this relation connects.
    pub const fn endpoints(self) -> (Partition, Partition) {
        match self {
            Self::OccursIn => (Partition::BiologicalProcess, Partition::CellularComponent),
            Self::EnabledBy => (Partition::BiologicalProcess, Partition::MolecularFunction),
            Self::HostsFunction => (Partition::CellularComponent, Partition::MolecularFunction),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SynonymScope {
    Exact,
    Broad,
    Narrow,
    Related,
}

impl SynonymScope {
    pub fn from_token(raw: &str) -> Option<Self> {
        match raw {
            "EXACT" => Some(Self::Exact),
            "BROAD" => Some(Self::Broad),
            "NARROW" => Some(Self::Narrow),
            "RELATED" => Some(Self::Related),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synonym {
    pub text: String,
    pub scope: SynonymScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRow {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub definition: Option<String>,
    pub is_obsolete: bool,
    pub synonyms: Vec<Synonym>,
    pub alt_ids: Vec<String>,
    pub alt_id_additions: Vec<String>,
    pub source_file: String,
    pub reference_validated: bool,
    pub name_corrected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneRow {
    pub id: i64,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub accession: Option<String>,
    pub numeric_id: Option<String>,
    pub taxon: Option<String>,
    pub db_source: Option<String>,
    pub id_type: String,
    pub synonyms: Vec<String>,
    pub source_files: Vec<String>,
    pub consolidated: bool,
}

impl GeneRow {
    pub fn identifier(&self, space: IdSpace) -> Option<&str> {
        match space {
            IdSpace::NumericId => self.numeric_id.as_deref(),
            IdSpace::Symbol => self.symbol.as_deref(),
            IdSpace::Accession => self.accession.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEdgeRow {
    pub child: String,
    pub parent: String,
    pub kind: HierarchyKind,
    pub source_file: String,
    pub cross_validated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRow {
    pub gene_id: i64,
    pub term_id: String,
    pub evidence_code: String,
    pub qualifier: String,
    pub source_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLinkRow {
    pub from_term: String,
    pub to_term: String,
    pub relation: String,
    pub shared_genes: u64,
    pub confidence: ConfidenceTier,
    pub created_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_are_inclusive() {
        let thresholds = TierThresholds::default();
        assert_eq!(confidence_tier(3, thresholds), ConfidenceTier::Low);
        assert_eq!(confidence_tier(9, thresholds), ConfidenceTier::Low);
        assert_eq!(confidence_tier(10, thresholds), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(49, thresholds), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(50, thresholds), ConfidenceTier::High);
    }

    #[test]
    fn relation_labels_normalize_and_keep_unknown_verbatim() {
        assert_eq!(RelationKind::from_label("part_of"), RelationKind::PartOf);
        assert_eq!(
            RelationKind::from_label("Negatively-Regulates"),
            RelationKind::NegativelyRegulates
        );
        assert_eq!(
            RelationKind::from_label("occurs_in"),
            RelationKind::Other("occurs_in".to_string())
        );
    }

    #[test]
    fn hierarchy_kind_encoding_preserves_other_label() {
        let kind = HierarchyKind::Relation(RelationKind::Other("has_part".to_string()));
        let (stored, raw) = encode_hierarchy_kind(&kind);
        assert_eq!(stored, "other");
        assert_eq!(decode_hierarchy_kind(stored, raw), kind);

        let (stored, raw) = encode_hierarchy_kind(&HierarchyKind::Collapsed);
        assert_eq!(decode_hierarchy_kind(stored, raw), HierarchyKind::Collapsed);
    }

    #[test]
    fn partition_parse_accepts_namespace_code_and_aspect() {
        assert_eq!(Partition::parse("bp"), Some(Partition::BiologicalProcess));
        assert_eq!(
            Partition::parse("cellular_component"),
            Some(Partition::CellularComponent)
        );
        assert_eq!(Partition::parse("F"), Some(Partition::MolecularFunction));
        assert_eq!(Partition::parse("cellular"), None);
    }

    #[test]
    fn derived_relations_connect_distinct_partitions() {
        for relation in DerivedRelation::ALL {
            let (from, to) = relation.endpoints();
            assert_ne!(from, to);
        }
    }
}
