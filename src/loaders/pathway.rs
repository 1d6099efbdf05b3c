use std::collections::BTreeMap;
use std::io::{self, BufRead};

use rusqlite::Transaction;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ingest::{Counters, UpsertOp};
use crate::loaders::attribute::relation_for;
use crate::loaders::{GeneEntityEdge, LoaderKind, gene_by_symbol, link_gene_entity, upsert_entity};
use crate::source::tables::TableReadStats;

pub const PATHWAY_KIND: &str = "pathway";
const PATHWAY_SOURCE: &str = "nest_table";

const ID_COLUMN: &str = "NEST ID";
const NAME_COLUMN: &str = "name";
const GENES_COLUMN: &str = "All_Genes";
const DRUG_COLUMNS: [&str; 6] = [
    "Camptothecin",
    "CD437",
    "Cisplatin",
    "Etoposide",
    "Gemcitabine",
    "Olaparib",
];

/// One curated pathway module and its member gene symbols.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathwayRecord {
    pub nest_id: String,
    pub name: String,
    pub description: Option<String>,
    pub genes: Vec<String>,
    pub size_all: u64,
    /// `<drug>_sensitivity` scores, keyed in lower case.
    pub sensitivities: BTreeMap<String, f64>,
    pub selected: Option<bool>,
    pub display_priority: Option<i64>,
    pub aggregate_score: Option<i64>,
}

impl PathwayRecord {
    fn attributes(&self) -> Value {
        let mut attrs = Map::new();
        attrs.insert("pathway_name".into(), Value::from(self.name.as_str()));
        attrs.insert(
            "pathway_description".into(),
            Value::from(self.description.as_deref().unwrap_or(&self.name)),
        );
        attrs.insert("gene_count".into(), Value::from(self.genes.len()));
        attrs.insert("size_all".into(), Value::from(self.size_all));
        attrs.insert("source".into(), Value::from(PATHWAY_SOURCE));
        for (key, score) in &self.sensitivities {
            attrs.insert(key.clone(), Value::from(*score));
        }
        if let Some(selected) = self.selected {
            attrs.insert("is_selected".into(), Value::from(selected));
        }
        if let Some(priority) = self.display_priority {
            attrs.insert("display_priority".into(), Value::from(priority));
        }
        if let Some(score) = self.aggregate_score {
            attrs.insert("aggregate_score".into(), Value::from(score));
        }
        Value::Object(attrs)
    }
}

struct Columns {
    id: usize,
    name: usize,
    genes: usize,
    description: Option<usize>,
    size_all: Option<usize>,
    drugs: Vec<(String, usize)>,
    selected: Option<usize>,
    display_priority: Option<usize>,
    aggregate_score: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> io::Result<Self> {
        let find = |name: &str| header.iter().position(|col| col.trim() == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("pathway table is missing column `{name}`"),
                )
            })
        };
        Ok(Self {
            id: required(ID_COLUMN)?,
            name: required(NAME_COLUMN)?,
            genes: required(GENES_COLUMN)?,
            description: find("name_new"),
            size_all: find("Size_All"),
            drugs: DRUG_COLUMNS
                .iter()
                .filter_map(|drug| {
                    find(*drug).map(|idx| (format!("{}_sensitivity", drug.to_ascii_lowercase()), idx))
                })
                .collect(),
            selected: find("selected"),
            display_priority: find("name_show"),
            aggregate_score: find("sum"),
        })
    }
}

/// Reads a comma-separated pathway table with a header row. `All_Genes`
/// holds a quoted, comma-separated symbol list. Rows without an id, a name or
/// any gene are counted invalid.
pub fn read_pathways<R: BufRead>(reader: R) -> io::Result<(Vec<PathwayRecord>, TableReadStats)> {
    let mut stats = TableReadStats::default();
    let mut out = Vec::new();
    let mut lines = reader.lines();

    let columns = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                let line = line.trim_start_matches('\u{feff}');
                if line.trim().is_empty() {
                    continue;
                }
                let header = split_csv_line(line).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "unterminated quote in pathway header")
                })?;
                break Columns::from_header(&header)?;
            }
            None => return Ok((out, stats)),
        }
    };

    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.rows += 1;
        let Some(fields) = split_csv_line(&line) else {
            stats.invalid_rows += 1;
            continue;
        };
        let cell = |idx: usize| fields.get(idx).map(String::as_str).and_then(present);
        let optional = |idx: Option<usize>| idx.and_then(cell);

        let (Some(nest_id), Some(name), Some(gene_list)) =
            (cell(columns.id), cell(columns.name), cell(columns.genes))
        else {
            stats.invalid_rows += 1;
            continue;
        };
        let mut genes: Vec<String> = Vec::new();
        for symbol in gene_list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !genes.iter().any(|existing| existing == symbol) {
                genes.push(symbol.to_string());
            }
        }
        if genes.is_empty() {
            stats.invalid_rows += 1;
            continue;
        }

        let sensitivities = columns
            .drugs
            .iter()
            .filter_map(|(key, idx)| {
                let score = cell(*idx)?.parse::<f64>().ok().filter(|v| v.is_finite())?;
                Some((key.clone(), score))
            })
            .collect();

        out.push(PathwayRecord {
            nest_id: nest_id.to_string(),
            name: name.to_string(),
            description: optional(columns.description).map(ToOwned::to_owned),
            size_all: optional(columns.size_all)
                .and_then(parse_integer)
                .and_then(|value| u64::try_from(value).ok())
                .unwrap_or(genes.len() as u64),
            genes,
            sensitivities,
            selected: optional(columns.selected).and_then(parse_flag),
            display_priority: optional(columns.display_priority).and_then(parse_integer),
            aggregate_score: optional(columns.aggregate_score).and_then(parse_integer),
        });
    }
    Ok((out, stats))
}

/// Splits one CSV record; `None` when a quoted field is left open.
fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}

fn present(raw: &str) -> Option<&str> {
    match raw.trim() {
        "" | "NA" | "nan" | "NaN" => None,
        value => Some(value),
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value as i64)
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" | "yes" => Some(true),
        "false" | "0" | "0.0" | "no" => Some(false),
        _ => None,
    }
}

pub struct PathwayUpsert {
    pub source_file: String,
}

impl UpsertOp for PathwayUpsert {
    type Record = PathwayRecord;

    fn stage(&self) -> String {
        format!("loader:pathway:{}", self.source_file)
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[PathwayRecord],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        for pathway in batch {
            upsert_entity(tx, PATHWAY_KIND, &pathway.nest_id, &pathway.attributes(), counters)?;
            for symbol in &pathway.genes {
                let gene_id = gene_by_symbol(tx, symbol, None, &self.source_file, counters)?;
                link_gene_entity(
                    tx,
                    &GeneEntityEdge {
                        gene_id,
                        entity_kind: PATHWAY_KIND,
                        entity_name: &pathway.nest_id,
                        relation: relation_for(LoaderKind::Pathway),
                        weight: None,
                        source_desc: &pathway.name,
                        source_file: &self.source_file,
                    },
                    counters,
                )?;
            }
        }
        Ok(())
    }
}
