pub mod config;
pub mod consolidate;
pub mod graph;
pub mod ingest;
pub mod interconnect;
pub mod loaders;
pub mod pipeline;
pub mod report;
pub mod source;
