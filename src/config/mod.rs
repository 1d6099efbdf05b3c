use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::graph::model::{IdSpace, Partition};
use crate::ingest::ResumePolicy;
use crate::interconnect::{InterconnectConfig, MinTerms};
use crate::loaders::{LoaderKind, LoaderSpec};

pub const PROJECT_CONFIG_FILE: &str = "genegraph.yml";
pub const DEFAULT_STORE_PATH: &str = ".genegraph/graph.sqlite";
const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store: PathBuf,
    pub data_root: PathBuf,
    /// Directory relative loader paths resolve against.
    pub base_dir: PathBuf,
    pub partitions: BTreeMap<Partition, PartitionFiles>,
    pub batch_sizes: BatchSizes,
    pub resume: ResumePolicy,
    pub consolidation_keys: Vec<IdSpace>,
    pub interconnect: InterconnectConfig,
    pub loaders: Vec<LoaderSpec>,
}

impl Config {
    pub fn defaults(cwd: &Path) -> Self {
        let data_root = cwd.to_path_buf();
        let partitions = Partition::ALL
            .into_iter()
            .map(|partition| {
                let dir = data_root.join(partition.default_data_dir());
                (partition, PartitionFiles::in_dir(&dir, &FileNames::default()))
            })
            .collect();
        Self {
            store: cwd.join(DEFAULT_STORE_PATH),
            data_root,
            base_dir: cwd.to_path_buf(),
            partitions,
            batch_sizes: BatchSizes::default(),
            resume: ResumePolicy::default(),
            consolidation_keys: vec![IdSpace::Symbol],
            interconnect: InterconnectConfig::default(),
            loaders: Vec::new(),
        }
    }

    pub fn partition_files(&self, partition: Partition) -> PartitionFiles {
        self.partitions.get(&partition).cloned().unwrap_or_else(|| {
            PartitionFiles::in_dir(
                &self.data_root.join(partition.default_data_dir()),
                &FileNames::default(),
            )
        })
    }
}

/// Resolved input paths for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFiles {
    pub data_dir: PathBuf,
    pub obo: PathBuf,
    pub names: PathBuf,
    pub namespaces: PathBuf,
    pub alt_ids: PathBuf,
    pub hierarchy: PathBuf,
    pub annotations: PathBuf,
    pub collapsed_numeric: PathBuf,
    pub collapsed_symbol: PathBuf,
    pub collapsed_accession: PathBuf,
}

impl PartitionFiles {
    fn in_dir(dir: &Path, names: &FileNames) -> Self {
        Self {
            data_dir: dir.to_path_buf(),
            obo: dir.join(&names.obo),
            names: dir.join(&names.names),
            namespaces: dir.join(&names.namespaces),
            alt_ids: dir.join(&names.alt_ids),
            hierarchy: dir.join(&names.hierarchy),
            annotations: dir.join(&names.annotations),
            collapsed_numeric: dir.join(&names.collapsed_numeric),
            collapsed_symbol: dir.join(&names.collapsed_symbol),
            collapsed_accession: dir.join(&names.collapsed_accession),
        }
    }

    pub fn collapsed(&self, space: IdSpace) -> &Path {
        match space {
            IdSpace::NumericId => &self.collapsed_numeric,
            IdSpace::Symbol => &self.collapsed_symbol,
            IdSpace::Accession => &self.collapsed_accession,
        }
    }

    pub fn all(&self) -> [(&'static str, &Path); 9] {
        [
            ("obo", &self.obo),
            ("names", &self.names),
            ("namespaces", &self.namespaces),
            ("alt_ids", &self.alt_ids),
            ("hierarchy", &self.hierarchy),
            ("annotations", &self.annotations),
            ("collapsed_numeric", &self.collapsed_numeric),
            ("collapsed_symbol", &self.collapsed_symbol),
            ("collapsed_accession", &self.collapsed_accession),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileNames {
    obo: String,
    names: String,
    namespaces: String,
    alt_ids: String,
    hierarchy: String,
    annotations: String,
    collapsed_numeric: String,
    collapsed_symbol: String,
    collapsed_accession: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            obo: "go-basic.obo".to_string(),
            names: "goID_2_name.tab".to_string(),
            namespaces: "goID_2_namespace.tab".to_string(),
            alt_ids: "goID_2_alt_id.tab".to_string(),
            hierarchy: "go.tab".to_string(),
            annotations: "goa_human.gaf.gz".to_string(),
            collapsed_numeric: "collapsed_go.entrez".to_string(),
            collapsed_symbol: "collapsed_go.symbol".to_string(),
            collapsed_accession: "collapsed_go.uniprot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub terms: usize,
    pub alt_mappings: usize,
    pub stanza_relations: usize,
    pub hierarchy: usize,
    pub annotations: usize,
    pub numeric_genes: usize,
    pub symbol_genes: usize,
    pub accession_genes: usize,
    pub collapsed_hierarchy: usize,
    pub derived_links: usize,
    pub loader: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            terms: DEFAULT_BATCH_SIZE,
            alt_mappings: DEFAULT_BATCH_SIZE,
            stanza_relations: DEFAULT_BATCH_SIZE,
            hierarchy: DEFAULT_BATCH_SIZE,
            annotations: DEFAULT_BATCH_SIZE,
            numeric_genes: 5000,
            symbol_genes: DEFAULT_BATCH_SIZE,
            accession_genes: 2000,
            collapsed_hierarchy: DEFAULT_BATCH_SIZE,
            derived_links: DEFAULT_BATCH_SIZE,
            loader: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BatchSizes {
    pub const fn genes(&self, space: IdSpace) -> usize {
        match space {
            IdSpace::NumericId => self.numeric_genes,
            IdSpace::Symbol => self.symbol_genes,
            IdSpace::Accession => self.accession_genes,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidValue { field: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::InvalidValue { field, value } => write!(f, "invalid {field} `{value}`"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    store: Option<String>,
    data_root: Option<String>,
    resume: Option<String>,
    #[serde(default)]
    partitions: BTreeMap<String, RawPartition>,
    #[serde(default)]
    batch_sizes: RawBatchSizes,
    #[serde(default)]
    consolidation: RawConsolidation,
    #[serde(default)]
    interconnect: RawInterconnect,
    loaders: Option<Vec<RawLoader>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPartition {
    data_dir: Option<String>,
    #[serde(default)]
    files: RawFileNames,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileNames {
    obo: Option<String>,
    names: Option<String>,
    namespaces: Option<String>,
    alt_ids: Option<String>,
    hierarchy: Option<String>,
    annotations: Option<String>,
    collapsed_numeric: Option<String>,
    collapsed_symbol: Option<String>,
    collapsed_accession: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBatchSizes {
    terms: Option<usize>,
    alt_mappings: Option<usize>,
    stanza_relations: Option<usize>,
    hierarchy: Option<usize>,
    annotations: Option<usize>,
    numeric_genes: Option<usize>,
    symbol_genes: Option<usize>,
    accession_genes: Option<usize>,
    collapsed_hierarchy: Option<usize>,
    derived_links: Option<usize>,
    loader: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConsolidation {
    keys: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInterconnect {
    min_shared_genes: Option<u64>,
    medium_threshold: Option<u64>,
    high_threshold: Option<u64>,
    #[serde(default)]
    min_terms: RawMinTerms,
    min_multi_namespace_genes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMinTerms {
    biological_process: Option<u64>,
    cellular_component: Option<u64>,
    molecular_function: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLoader {
    kind: String,
    path: String,
}

/// Defaults, then the nearest `genegraph.yml` above `cwd`, then `explicit`.
pub fn load_effective_config(cwd: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::defaults(cwd);
    let mut file_names: BTreeMap<Partition, FileNames> = Partition::ALL
        .into_iter()
        .map(|partition| (partition, FileNames::default()))
        .collect();
    let mut data_dirs: BTreeMap<Partition, PathBuf> = BTreeMap::new();

    let mut layers = Vec::new();
    if let Some(path) = find_nearest_project_config(cwd) {
        layers.push(path);
    }
    if let Some(path) = explicit {
        layers.push(path.to_path_buf());
    }

    for path in layers {
        let raw = load_raw(&path)?;
        let layer_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
        apply_layer(&mut config, &mut file_names, &mut data_dirs, raw, &layer_dir)?;
    }

    config.partitions = Partition::ALL
        .into_iter()
        .map(|partition| {
            let dir = data_dirs
                .get(&partition)
                .cloned()
                .unwrap_or_else(|| config.data_root.join(partition.default_data_dir()));
            let names = file_names.get(&partition).cloned().unwrap_or_default();
            (partition, PartitionFiles::in_dir(&dir, &names))
        })
        .collect();
    Ok(config)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn load_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_raw(&content)
}

fn parse_raw(content: &str) -> Result<RawConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Relative paths in a layer resolve against the directory holding the file.
fn apply_layer(
    config: &mut Config,
    file_names: &mut BTreeMap<Partition, FileNames>,
    data_dirs: &mut BTreeMap<Partition, PathBuf>,
    raw: RawConfig,
    layer_dir: &Path,
) -> Result<(), ConfigError> {
    if let Some(store) = raw.store {
        config.store = resolve(layer_dir, &store);
    }
    if let Some(root) = raw.data_root {
        config.data_root = resolve(layer_dir, &root);
        config.base_dir = config.data_root.clone();
    }
    if let Some(resume) = raw.resume {
        config.resume = ResumePolicy::parse(&resume).ok_or(ConfigError::InvalidValue {
            field: "resume",
            value: resume,
        })?;
    }

    for (key, partition_raw) in raw.partitions {
        let partition = Partition::parse(&key).ok_or(ConfigError::InvalidValue {
            field: "partition",
            value: key,
        })?;
        if let Some(dir) = partition_raw.data_dir {
            // Partition directories are relative to the data root.
            let dir_path = Path::new(&dir);
            let resolved = if dir_path.is_absolute() {
                dir_path.to_path_buf()
            } else {
                config.data_root.join(dir_path)
            };
            data_dirs.insert(partition, resolved);
        }
        let names = file_names.entry(partition).or_default();
        let files = partition_raw.files;
        override_string(&mut names.obo, files.obo);
        override_string(&mut names.names, files.names);
        override_string(&mut names.namespaces, files.namespaces);
        override_string(&mut names.alt_ids, files.alt_ids);
        override_string(&mut names.hierarchy, files.hierarchy);
        override_string(&mut names.annotations, files.annotations);
        override_string(&mut names.collapsed_numeric, files.collapsed_numeric);
        override_string(&mut names.collapsed_symbol, files.collapsed_symbol);
        override_string(&mut names.collapsed_accession, files.collapsed_accession);
    }

    let sizes = &mut config.batch_sizes;
    let raw_sizes = raw.batch_sizes;
    override_size(&mut sizes.terms, raw_sizes.terms, "batch_sizes.terms")?;
    override_size(&mut sizes.alt_mappings, raw_sizes.alt_mappings, "batch_sizes.alt_mappings")?;
    override_size(
        &mut sizes.stanza_relations,
        raw_sizes.stanza_relations,
        "batch_sizes.stanza_relations",
    )?;
    override_size(&mut sizes.hierarchy, raw_sizes.hierarchy, "batch_sizes.hierarchy")?;
    override_size(&mut sizes.annotations, raw_sizes.annotations, "batch_sizes.annotations")?;
    override_size(&mut sizes.numeric_genes, raw_sizes.numeric_genes, "batch_sizes.numeric_genes")?;
    override_size(&mut sizes.symbol_genes, raw_sizes.symbol_genes, "batch_sizes.symbol_genes")?;
    override_size(
        &mut sizes.accession_genes,
        raw_sizes.accession_genes,
        "batch_sizes.accession_genes",
    )?;
    override_size(
        &mut sizes.collapsed_hierarchy,
        raw_sizes.collapsed_hierarchy,
        "batch_sizes.collapsed_hierarchy",
    )?;
    override_size(&mut sizes.derived_links, raw_sizes.derived_links, "batch_sizes.derived_links")?;
    override_size(&mut sizes.loader, raw_sizes.loader, "batch_sizes.loader")?;

    if let Some(keys) = raw.consolidation.keys {
        let mut parsed = Vec::with_capacity(keys.len());
        for key in keys {
            let space = IdSpace::parse(&key).ok_or(ConfigError::InvalidValue {
                field: "consolidation.keys",
                value: key,
            })?;
            if !parsed.contains(&space) {
                parsed.push(space);
            }
        }
        config.consolidation_keys = parsed;
    }

    apply_interconnect(&mut config.interconnect, raw.interconnect)?;

    if let Some(loaders) = raw.loaders {
        let mut incoming = Vec::with_capacity(loaders.len());
        for loader in loaders {
            let kind = LoaderKind::parse(&loader.kind).ok_or(ConfigError::InvalidValue {
                field: "loaders.kind",
                value: loader.kind,
            })?;
            incoming.push(LoaderSpec {
                kind,
                path: loader.path,
            });
        }
        merge_loaders_dedup(&mut config.loaders, incoming);
    }
    Ok(())
}

fn apply_interconnect(target: &mut InterconnectConfig, raw: RawInterconnect) -> Result<(), ConfigError> {
    if let Some(value) = raw.min_shared_genes {
        target.min_shared_genes = value;
    }
    let mut thresholds = target.thresholds;
    if let Some(value) = raw.medium_threshold {
        thresholds.medium = value;
    }
    if let Some(value) = raw.high_threshold {
        thresholds.high = value;
    }
    if thresholds.medium > thresholds.high {
        return Err(ConfigError::InvalidValue {
            field: "interconnect.medium_threshold",
            value: format!("{} above high threshold {}", thresholds.medium, thresholds.high),
        });
    }
    target.thresholds = thresholds;

    let MinTerms {
        biological_process,
        cellular_component,
        molecular_function,
    } = target.min_terms;
    target.min_terms = MinTerms {
        biological_process: raw.min_terms.biological_process.unwrap_or(biological_process),
        cellular_component: raw.min_terms.cellular_component.unwrap_or(cellular_component),
        molecular_function: raw.min_terms.molecular_function.unwrap_or(molecular_function),
    };
    if let Some(value) = raw.min_multi_namespace_genes {
        target.min_multi_namespace_genes = value;
    }
    Ok(())
}

/// Later layers replace a loader with the same path.
fn merge_loaders_dedup(existing: &mut Vec<LoaderSpec>, incoming: Vec<LoaderSpec>) {
    for loader in incoming {
        match existing.iter_mut().find(|current| current.path == loader.path) {
            Some(current) => *current = loader,
            None => existing.push(loader),
        }
    }
}

fn override_string(slot: &mut String, value: Option<String>) {
    if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
        *slot = value;
    }
}

fn override_size(slot: &mut usize, value: Option<usize>, field: &'static str) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            field,
            value: "0".to_string(),
        }),
        Some(size) => {
            *slot = size;
            Ok(())
        }
        None => Ok(()),
    }
}

fn resolve(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn default_config_yaml() -> String {
    r#"store: .genegraph/graph.sqlite
data_root: .
resume: checkpoint
partitions:
  biological_process:
    data_dir: GO_BP
  cellular_component:
    data_dir: GO_CC
  molecular_function:
    data_dir: GO_MF
consolidation:
  keys: [symbol]
interconnect:
  min_shared_genes: 3
  medium_threshold: 10
  high_threshold: 50
  min_multi_namespace_genes: 10000
loaders: []
"#
    .to_string()
}
