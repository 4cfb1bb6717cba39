use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::metadata::{EntryRecord, MetadataError, MetadataSink, RunSummary};

pub struct JsonlSink {
    tool_version: String,
    config_hash: String,
    summary_path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct VersionedEntry<'a> {
    #[serde(flatten)]
    record: &'a EntryRecord<'a>,
    tool_version: &'a str,
    config_hash: &'a str,
}

#[derive(Serialize)]
struct VersionedSummary<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    tool_version: &'a str,
    config_hash: &'a str,
}

impl JsonlSink {
    pub fn new(
        tool_version: &str,
        config_hash: &str,
        run_output_dir: &Path,
    ) -> Result<Self, MetadataError> {
        let meta_dir = run_output_dir.join("metadata");
        std::fs::create_dir_all(&meta_dir)?;
        let file = File::create(meta_dir.join("entries.jsonl"))?;
        Ok(Self {
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
            summary_path: meta_dir.join("run_summary.json"),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, BufWriter<File>>, MetadataError> {
        self.writer
            .lock()
            .map_err(|_| MetadataError::Other("entry writer lock poisoned".to_string()))
    }
}

impl MetadataSink for JsonlSink {
    fn record_entry(&self, record: &EntryRecord<'_>) -> Result<(), MetadataError> {
        let line = VersionedEntry {
            record,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        let mut guard = self.writer()?;
        serde_json::to_writer(&mut *guard, &line)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        let doc = VersionedSummary {
            summary,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        let file = File::create(&self.summary_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &doc)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        let mut guard = self.writer()?;
        guard.flush()?;
        Ok(())
    }
}
