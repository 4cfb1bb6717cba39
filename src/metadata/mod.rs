pub mod jsonl;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::mapper::MappedEntry;
use crate::pipeline::PipelineStats;

/// One mapped detection as written to `entries.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRecord<'a> {
    pub run_id: &'a str,
    pub index: usize,
    #[serde(flatten)]
    pub entry: &'a MappedEntry,
    /// Confidence implied by the detection's severity class.
    pub detection_confidence: f64,
}

impl<'a> EntryRecord<'a> {
    pub fn new(run_id: &'a str, index: usize, entry: &'a MappedEntry) -> Self {
        Self {
            run_id,
            index,
            entry,
            detection_confidence: entry.detection.severity_class.heuristic_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub video_path: String,
    pub section_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub detections: usize,
    pub mapped_entries: usize,
    pub stats: PipelineStats,
    pub warnings: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

/// Output sink for mapped entries and the run summary.
///
/// # Example
/// ```rust
/// use sewerscan::metadata::{self, MetadataSink};
///
/// let run_output_dir = std::env::temp_dir().join("sewerscan_meta_example");
/// std::fs::create_dir_all(&run_output_dir).unwrap();
///
/// let sink = metadata::build_sink("0.2.1", "abc123", &run_output_dir).unwrap();
/// sink.flush().unwrap();
/// ```
pub trait MetadataSink: Send + Sync {
    fn record_entry(&self, record: &EntryRecord<'_>) -> Result<(), MetadataError>;
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError>;
    fn flush(&self) -> Result<(), MetadataError>;
}

/// A no-op sink for dry-run mode that doesn't write any files
pub struct DryRunSink;

impl MetadataSink for DryRunSink {
    fn record_entry(&self, _record: &EntryRecord<'_>) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_run_summary(&self, _summary: &RunSummary) -> Result<(), MetadataError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

pub fn build_sink(
    tool_version: &str,
    config_hash: &str,
    run_output_dir: &Path,
) -> Result<Box<dyn MetadataSink>, MetadataError> {
    Ok(Box::new(jsonl::JsonlSink::new(
        tool_version,
        config_hash,
        run_output_dir,
    )?))
}

/// Build a dry-run sink that doesn't write any files
pub fn build_dry_run_sink() -> Box<dyn MetadataSink> {
    Box::new(DryRunSink)
}
