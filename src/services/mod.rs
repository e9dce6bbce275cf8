pub mod ingest;
pub mod processing;

pub use ingest::IngestService;
pub use processing::ProcessingEngine;
