use std::io::{self, BufRead};

use serde::Serialize;

use crate::graph::model::RelationKind;

/// Row of the hierarchy table: `parent, child, relation, namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyRow {
    pub parent: String,
    pub child: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollapsedLink {
    pub child: String,
    pub parent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollapsedGeneLink {
    pub term_id: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollapsedTable {
    pub hierarchy: Vec<CollapsedLink>,
    pub genes: Vec<CollapsedGeneLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableReadStats {
    pub rows: u64,
    pub invalid_rows: u64,
}

pub fn read_hierarchy_table<R: BufRead>(reader: R) -> io::Result<(Vec<HierarchyRow>, TableReadStats)> {
    let mut stats = TableReadStats::default();
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        stats.rows += 1;
        let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
        if cols.len() < 4 || cols[0].is_empty() || cols[1].is_empty() || cols[2].is_empty() {
            stats.invalid_rows += 1;
            continue;
        }
        out.push(HierarchyRow {
            parent: cols[0].to_string(),
            child: cols[1].to_string(),
            kind: RelationKind::from_label(cols[2]),
        });
    }
    Ok((out, stats))
}

/// Reads a three-column collapsed table. `default` rows are term hierarchy
/// (child, parent); `gene` rows associate a term with a gene identifier.
pub fn read_collapsed_table<R: BufRead>(reader: R) -> io::Result<(CollapsedTable, TableReadStats)> {
    let mut stats = TableReadStats::default();
    let mut table = CollapsedTable::default();
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
        match cols[2] {
            "default" => table.hierarchy.push(CollapsedLink {
                child: cols[0].to_string(),
                parent: cols[1].to_string(),
            }),
            "gene" => table.genes.push(CollapsedGeneLink {
                term_id: cols[0].to_string(),
                identifier: cols[1].to_string(),
            }),
            _ => stats.invalid_rows += 1,
        }
    }
    Ok((table, stats))
}
