use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use sewerscan::metadata::{self, EntryRecord, MetadataSink, RunSummary};
use sewerscan::pipeline::{
    self, PipelineError, PipelineProgress, PipelineRequest, PipelineResult, ProgressConfig,
    ProgressReporter,
};
use sewerscan::{cli, config, logging, util};

struct LogProgress;

impl ProgressReporter for LogProgress {
    fn on_progress(&self, progress: &PipelineProgress) {
        info!(
            "progress phase={:?} {}/{} ({:.1}%) {}",
            progress.phase,
            progress.done,
            progress.total,
            progress.percent(),
            progress.status
        );
    }
}

fn main() -> Result<ExitCode> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_format);

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    if let Some(step) = cli_opts.frame_step {
        cfg.frame_step_seconds = step;
    }
    if let Some(window) = cli_opts.dedup_window {
        cfg.dedup_window_frames = window;
    }
    if let Some(min_severity) = cli_opts.min_severity {
        cfg.min_severity = min_severity;
    }
    if let Some(workers) = cli_opts.workers {
        cfg.frame_workers = if workers == 0 { num_cpus::get() } else { workers };
    }
    cfg.validate()?;

    let catalog = util::build_catalog(cli_opts.codes.as_deref(), cli_opts.catalog.as_deref())?;
    let services = util::build_services(&cfg, catalog, !cli_opts.no_plausibility)?;

    let run_output_dir = cli_opts.output.join(&cfg.run_id);
    let tool_version = env!("CARGO_PKG_VERSION");
    let sink: Box<dyn MetadataSink> = if cli_opts.dry_run {
        info!("dry run: no output files will be written");
        metadata::build_dry_run_sink()
    } else {
        util::ensure_output_dir(&run_output_dir)?;
        metadata::build_sink(tool_version, &loaded.config_hash, &run_output_dir)?
    };

    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = cancel_flag.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    }

    info!(
        "starting run_id={} input={} output={} step={}s window={} workers={}",
        cfg.run_id,
        cli_opts.input.trim(),
        run_output_dir.display(),
        cfg.frame_step_seconds,
        cfg.dedup_window_frames,
        cfg.frame_workers
    );

    let request = PipelineRequest {
        video: cli_opts.input.clone(),
        section_id: cli_opts.section_id.clone(),
    };
    let started_at = chrono::Utc::now();
    let progress = ProgressConfig {
        reporter: Arc::new(LogProgress),
        interval: Duration::from_secs(2),
    };
    let outcome =
        pipeline::run_pipeline_with_cancel(&cfg, &services, &request, cancel_flag, Some(progress));

    let (result, exit) = match outcome {
        Ok(result) => (result, ExitCode::SUCCESS),
        Err(err) => {
            warn!("run did not complete: {err}");
            let code = match err {
                PipelineError::Cancelled { .. } => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            };
            (PipelineResult::failed(&err), code)
        }
    };

    for (index, entry) in result.mapped_entries.iter().enumerate() {
        sink.record_entry(&EntryRecord::new(&cfg.run_id, index, entry))?;
    }
    let summary = RunSummary {
        run_id: cfg.run_id.clone(),
        video_path: cli_opts.input.trim().to_string(),
        section_id: cli_opts.section_id.clone(),
        success: result.is_success(),
        error: result.error.clone(),
        detections: result.detections.len(),
        mapped_entries: result.mapped_entries.len(),
        stats: result.stats.clone(),
        warnings: result.warnings.clone(),
        started_at: started_at.to_rfc3339(),
        finished_at: chrono::Utc::now().to_rfc3339(),
    };
    sink.record_run_summary(&summary)?;
    sink.flush()?;

    for warning in &result.warnings {
        warn!("{warning}");
    }
    info!(
        "sewerscan run finished: detections={} high_confidence={}",
        result.detections.len(),
        result.stats.high_confidence_count
    );
    Ok(exit)
}
