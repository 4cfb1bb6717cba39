mod common;

use std::fs;

use common::{Fakes, ScriptedClassifier, ScriptedDecoder, ScriptedVision};
use sewerscan::metadata::{self, EntryRecord, MetadataSink, RunSummary};
use sewerscan::pipeline::{self, PipelineRequest};

#[test]
fn jsonl_sink_writes_entries_and_summary() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let video = common::video_file(temp_dir.path());
    let fakes = Fakes::new(
        ScriptedDecoder::with_duration(6.0),
        ScriptedVision::new()
            .frame(0.0, &[("Root intrusion", 4)])
            .frame(4.0, &[("Deposit", 2)]),
        ScriptedClassifier::new()
            .code("Root intrusion", "BBA", 0.85)
            .code("Deposit", "BBC", 0.5),
    );
    let cfg = common::test_config();
    let request = PipelineRequest {
        video: video.display().to_string(),
        section_id: Some("S-7".to_string()),
    };
    let result = pipeline::run_pipeline(&cfg, &fakes.services(), &request).expect("run");

    let run_output_dir = temp_dir.path().join("out").join(&cfg.run_id);
    let sink = metadata::build_sink("0.2.1", "cafebabe", &run_output_dir).expect("sink");
    for (index, entry) in result.mapped_entries.iter().enumerate() {
        sink.record_entry(&EntryRecord::new(&cfg.run_id, index, entry))
            .expect("entry");
    }
    let summary = RunSummary {
        run_id: cfg.run_id.clone(),
        video_path: request.video.clone(),
        section_id: request.section_id.clone(),
        success: result.is_success(),
        error: result.error.clone(),
        detections: result.detections.len(),
        mapped_entries: result.mapped_entries.len(),
        stats: result.stats.clone(),
        warnings: result.warnings.clone(),
        started_at: "2024-01-01T00:00:00+00:00".to_string(),
        finished_at: "2024-01-01T00:00:05+00:00".to_string(),
    };
    sink.record_run_summary(&summary).expect("summary");
    sink.flush().expect("flush");

    let meta_dir = run_output_dir.join("metadata");
    let entries = fs::read_to_string(meta_dir.join("entries.jsonl")).expect("entries");
    let lines: Vec<serde_json::Value> = entries
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["run_id"], "test_run");
    assert_eq!(lines[0]["index"], 0);
    assert_eq!(lines[0]["suggested_code"], "BBA");
    assert_eq!(lines[0]["detection"]["label"], "Root intrusion");
    assert_eq!(lines[0]["detection"]["severity_class"], "high");
    assert_eq!(lines[0]["detection_confidence"], 0.9);
    assert_eq!(lines[0]["tool_version"], "0.2.1");
    assert_eq!(lines[0]["config_hash"], "cafebabe");
    // BBC is not among the allowed codes.
    assert_eq!(lines[1]["suggested_code"], "BBC");
    assert_eq!(lines[1]["warnings"].as_array().map(Vec::len), Some(1));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(meta_dir.join("run_summary.json")).expect("read"))
            .expect("summary json");
    assert_eq!(summary["success"], true);
    assert_eq!(summary["section_id"], "S-7");
    assert_eq!(summary["detections"], 2);
    assert_eq!(summary["stats"]["frames_analyzed"], 3);
    assert_eq!(summary["config_hash"], "cafebabe");
}

#[test]
fn dry_run_sink_writes_nothing() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sink = metadata::build_dry_run_sink();
    let summary = RunSummary {
        run_id: "dry".to_string(),
        video_path: "x.mp4".to_string(),
        section_id: None,
        success: false,
        error: Some("run cancelled after 0 frames".to_string()),
        detections: 0,
        mapped_entries: 0,
        stats: Default::default(),
        warnings: Vec::new(),
        started_at: String::new(),
        finished_at: String::new(),
    };
    sink.record_run_summary(&summary).expect("summary");
    sink.flush().expect("flush");
    assert_eq!(fs::read_dir(temp_dir.path()).expect("read dir").count(), 0);
}
