//! Readers for the pipeline's input files.

pub mod compress;
pub mod gaf;
pub mod obo;
pub mod reference;
pub mod tables;

use std::path::Path;

use crate::source::compress::open_input;

#[derive(Debug)]
pub enum SourceError {
    Io { path: String, source: std::io::Error },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {path}: {source}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Opens `path` (plain, gzip or zstd) and hands the reader to `parse`.
pub fn read_with<T>(
    path: &Path,
    parse: impl FnOnce(Box<dyn std::io::BufRead>) -> std::io::Result<T>,
) -> Result<T, SourceError> {
    let io_error = |source| SourceError::Io {
        path: path.display().to_string(),
        source,
    };
    let reader = open_input(path).map_err(io_error)?;
    parse(reader).map_err(io_error)
}

/// Name recorded as `source_file` on everything ingested from `path`.
pub fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
