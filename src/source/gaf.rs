use std::io::{self, BufRead};

use serde::Serialize;

use crate::graph::model::Partition;

const MIN_COLUMNS: usize = 15;

/// One annotation row, columns 1-17 of the annotation file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationRecord {
    pub db: String,
    pub accession: String,
    pub symbol: String,
    pub qualifier: String,
    pub term_id: String,
    pub reference: String,
    pub evidence_code: String,
    pub with_from: String,
    pub aspect: String,
    pub object_name: String,
    pub synonyms: Vec<String>,
    pub object_type: String,
    pub taxon: String,
    pub date: String,
    pub assigned_by: String,
    pub extension: Option<String>,
    pub form_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AnnotationReadStats {
    pub rows: u64,
    pub comments: u64,
    pub invalid_rows: u64,
    pub other_partition: u64,
    pub kept: u64,
}

impl AnnotationRecord {
    pub fn parse(line: &str) -> Option<Self> {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < MIN_COLUMNS {
            return None;
        }
        let optional = |idx: usize| {
            cols.get(idx)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
        };
        Some(Self {
            db: cols[0].trim().to_string(),
            accession: cols[1].trim().to_string(),
            symbol: cols[2].trim().to_string(),
            qualifier: cols[3].trim().to_string(),
            term_id: cols[4].trim().to_string(),
            reference: cols[5].trim().to_string(),
            evidence_code: cols[6].trim().to_string(),
            with_from: cols[7].trim().to_string(),
            aspect: cols[8].trim().to_string(),
            object_name: cols[9].trim().to_string(),
            synonyms: cols[10]
                .split('|')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            object_type: cols[11].trim().to_string(),
            taxon: cols[12].trim().to_string(),
            date: cols[13].trim().to_string(),
            assigned_by: cols[14].trim().to_string(),
            extension: optional(15),
            form_id: optional(16),
        })
    }

    /// Kept when either the aspect letter or the qualifier names the partition.
    pub fn belongs_to(&self, partition: Partition) -> bool {
        self.aspect == partition.aspect() || self.qualifier == partition.qualifier()
    }
}

pub fn read_annotations<R: BufRead>(
    reader: R,
    partition: Partition,
) -> io::Result<(Vec<AnnotationRecord>, AnnotationReadStats)> {
    let mut stats = AnnotationReadStats::default();
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('!') {
            stats.comments += 1;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        stats.rows += 1;
        let Some(record) = AnnotationRecord::parse(&line) else {
            stats.invalid_rows += 1;
            continue;
        };
        if record.accession.is_empty() || record.term_id.is_empty() {
            stats.invalid_rows += 1;
            continue;
        }
        if !record.belongs_to(partition) {
            stats.other_partition += 1;
            continue;
        }
        stats.kept += 1;
        out.push(record);
    }
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROWS: &str = "!gaf-version: 2.2\n\
UniProtKB\tP04637\tTP53\tinvolved_in\tGO:0006915\tPMID:1\tIDA\t\tP\tCellular tumor antigen p53\tP53|LFS1\tprotein\ttaxon:9606\t20200101\tUniProt\n\
UniProtKB\tP04637\tTP53\tlocated_in\tGO:0005634\tPMID:2\tIDA\t\tC\tCellular tumor antigen p53\tP53\tprotein\ttaxon:9606\t20200101\tUniProt\t\tUniProtKB:P04637-2\n\
UniProtKB\tP38398\tBRCA1\tinvolved_in\tGO:0006281\n";

    #[test]
    fn filters_by_partition_and_counts_short_rows() {
        let (records, stats) =
            read_annotations(ROWS.as_bytes(), Partition::BiologicalProcess).expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].term_id, "GO:0006915");
        assert_eq!(records[0].evidence_code, "IDA");
        assert_eq!(records[0].qualifier, "involved_in");
        assert_eq!(records[0].synonyms, vec!["P53", "LFS1"]);
        assert_eq!(records[0].extension, None);
        assert_eq!(stats.comments, 1);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.invalid_rows, 1);
        assert_eq!(stats.other_partition, 1);
    }

    #[test]
    fn optional_trailing_columns_are_read() {
        let (records, _) =
            read_annotations(ROWS.as_bytes(), Partition::CellularComponent).expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].form_id.as_deref(), Some("UniProtKB:P04637-2"));
    }

    #[test]
    fn qualifier_match_keeps_row_with_other_aspect() {
        let line = "UniProtKB\tQ1\tGENE1\tenables\tGO:0003674\tPMID:3\tIEA\t\tP\tname\t\tprotein\ttaxon:9606\t20200101\tUniProt";
        let record = AnnotationRecord::parse(line).expect("parse");
        assert!(record.belongs_to(Partition::MolecularFunction));
        assert!(record.belongs_to(Partition::BiologicalProcess));
        assert!(!record.belongs_to(Partition::CellularComponent));
    }
}
