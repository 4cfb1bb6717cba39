//! # Pipeline Module
//!
//! Orchestrates one analysis run: duration probe, the frame loop feeding the
//! tracker, the flush, then one code mapping per detection. Frame work runs
//! on the calling thread or on a bounded worker pool; the tracker itself is
//! only ever touched by the orchestrating thread.

pub mod events;
pub mod workers;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analyzer::{FrameAnalyzer, VisionInference};
use crate::cancel::is_cancelled;
use crate::catalog::CodeCatalog;
use crate::config::Config;
use crate::constants::{CANCEL_POLL_INTERVAL, CHANNEL_CAPACITY_MULTIPLIER, MIN_CHANNEL_CAPACITY};
use crate::decoder::{DecodeError, Decoder};
use crate::mapper::{CodeClassifier, CodeMapper, MappedEntry};
use crate::meter::MeterEstimator;
use crate::plausibility::PlausibilityCheck;
use crate::tracker::{DamageTracker, Detection};
use crate::util::{dedupe_case_insensitive, normalize_video_path};

use events::{FrameEvent, FrameJob, FrameResult};
use workers::ReorderBuffer;

pub const NO_DAMAGE_WARNING: &str = "no damage detected";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video analysis is disabled")]
    Disabled,
    #[error("code catalog is empty")]
    EmptyCatalog,
    #[error("video not found: {0}")]
    VideoNotFound(String),
    #[error("could not determine video duration: {0}")]
    Duration(String),
    /// Provisional detections are a flush of partial state, not a result.
    #[error("run cancelled after {frames_analyzed} frames")]
    Cancelled {
        frames_analyzed: u64,
        provisional: Vec<Detection>,
    },
}

/// External capabilities one run depends on.
#[derive(Clone)]
pub struct PipelineServices {
    pub decoder: Arc<dyn Decoder>,
    pub vision: Arc<dyn VisionInference>,
    pub classifier: Arc<dyn CodeClassifier>,
    pub plausibility: Arc<dyn PlausibilityCheck>,
    pub catalog: Arc<dyn CodeCatalog>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// Path or `file://` URI of the inspection video.
    pub video: String,
    /// Pipe section between two manholes, passed through to prompts.
    pub section_id: Option<String>,
}

/// Pipeline statistics collected during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub frames_analyzed: u64,
    pub duration_seconds: f64,
    /// Detections emitted by the tracker, before mapping.
    pub raw_detection_count: u64,
    /// Per-frame findings fed to the tracker, summed over all frames.
    pub raw_finding_count: u64,
    pub high_confidence_count: u64,
    pub failed_frames: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub detections: Vec<Detection>,
    pub mapped_entries: Vec<MappedEntry>,
    pub stats: PipelineStats,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl PipelineResult {
    /// Result shape for a run that produced nothing but a reason.
    pub fn failed(error: &PipelineError) -> Self {
        let mut result = Self {
            error: Some(error.to_string()),
            ..Self::default()
        };
        if let PipelineError::Cancelled {
            frames_analyzed,
            provisional,
        } = error
        {
            result.stats.frames_analyzed = *frames_analyzed;
            result.detections = provisional.clone();
        }
        result
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    VideoAnalysis,
    CodeMapping,
    Done,
}

/// Progress snapshot reported during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineProgress {
    pub phase: PipelinePhase,
    pub done: u64,
    pub total: u64,
    pub status: String,
}

impl PipelineProgress {
    /// Completion of the current phase (0.0 - 100.0)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            if self.phase == PipelinePhase::Done {
                100.0
            } else {
                0.0
            }
        } else {
            (self.done as f64 / self.total as f64 * 100.0).min(100.0)
        }
    }
}

/// Progress callback trait for long-running runs.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, progress: &PipelineProgress);
}

pub struct ProgressConfig {
    pub reporter: Arc<dyn ProgressReporter>,
    /// Minimum gap between reports within a phase; zero reports every step.
    pub interval: Duration,
}

/// Run the analysis pipeline to completion.
pub fn run_pipeline(
    cfg: &Config,
    services: &PipelineServices,
    request: &PipelineRequest,
) -> Result<PipelineResult, PipelineError> {
    run_pipeline_inner(
        cfg,
        services,
        request,
        Arc::new(AtomicBool::new(false)),
        None,
    )
}

/// Run the pipeline with an external cancellation flag (e.g., Ctrl+C).
pub fn run_pipeline_with_cancel(
    cfg: &Config,
    services: &PipelineServices,
    request: &PipelineRequest,
    cancel_flag: Arc<AtomicBool>,
    progress: Option<ProgressConfig>,
) -> Result<PipelineResult, PipelineError> {
    run_pipeline_inner(cfg, services, request, cancel_flag, progress)
}

fn run_pipeline_inner(
    cfg: &Config,
    services: &PipelineServices,
    request: &PipelineRequest,
    cancel_flag: Arc<AtomicBool>,
    progress: Option<ProgressConfig>,
) -> Result<PipelineResult, PipelineError> {
    PipelineRunner::new(cfg, services, request, cancel_flag, progress).run()
}

struct FrameOutcome {
    tracker: DamageTracker,
    frames_analyzed: u64,
    failed_frames: u64,
    raw_finding_count: u64,
    /// Frames the worker pool never returned.
    lost_frames: u64,
    cancelled: bool,
}

struct FrameState<'m> {
    tracker: DamageTracker,
    estimator: &'m MeterEstimator,
    frames_analyzed: u64,
    failed_frames: u64,
    raw_finding_count: u64,
}

impl FrameState<'_> {
    fn apply(&mut self, event: FrameEvent) {
        let offset = event.job.offset_seconds;
        match event.result {
            FrameResult::Analysed(analysis) if !analysis.failed() => {
                let meter = self.estimator.resolve(analysis.meter, offset);
                debug!(
                    "frame {} at {:.2}s: meter={:.2} ({:?}) findings={}",
                    event.job.index,
                    offset,
                    meter.value,
                    meter.source,
                    analysis.findings.len()
                );
                self.raw_finding_count += analysis.findings.len() as u64;
                self.tracker.observe(meter.value, offset, &analysis.findings);
            }
            FrameResult::Analysed(_) | FrameResult::DecodeFailed => {
                self.failed_frames += 1;
                self.tracker.skip_frame();
            }
            FrameResult::Cancelled => return,
        }
        self.frames_analyzed += 1;
    }

    fn finish(self, cancelled: bool) -> FrameOutcome {
        self.finish_with_lost(0, cancelled)
    }

    fn finish_with_lost(self, lost_frames: u64, cancelled: bool) -> FrameOutcome {
        FrameOutcome {
            tracker: self.tracker,
            frames_analyzed: self.frames_analyzed,
            failed_frames: self.failed_frames,
            raw_finding_count: self.raw_finding_count,
            lost_frames,
            cancelled,
        }
    }
}

struct PipelineRunner<'a> {
    cfg: &'a Config,
    services: &'a PipelineServices,
    request: &'a PipelineRequest,
    cancel_flag: Arc<AtomicBool>,
    progress: Option<ProgressConfig>,
    last_progress: Option<Instant>,
}

impl<'a> PipelineRunner<'a> {
    fn new(
        cfg: &'a Config,
        services: &'a PipelineServices,
        request: &'a PipelineRequest,
        cancel_flag: Arc<AtomicBool>,
        progress: Option<ProgressConfig>,
    ) -> Self {
        Self {
            cfg,
            services,
            request,
            cancel_flag,
            progress,
            last_progress: None,
        }
    }

    fn run(mut self) -> Result<PipelineResult, PipelineError> {
        if !self.cfg.enabled {
            return Err(PipelineError::Disabled);
        }
        let allowed_codes = self.services.catalog.allowed_codes();
        if allowed_codes.is_empty() {
            return Err(PipelineError::EmptyCatalog);
        }
        let video = self.resolve_video()?;
        if is_cancelled(&self.cancel_flag) {
            return Err(cancelled(0, Vec::new()));
        }

        let duration = self.probe_duration(&video)?;
        let step = self.cfg.frame_step_seconds;
        let jobs = frame_jobs(duration, step);
        info!(
            "video={} duration={:.2}s step={:.2}s frames={} workers={}",
            video.display(),
            duration,
            step,
            jobs.total(),
            self.cfg.frame_workers
        );

        let estimator = MeterEstimator::new(duration, &self.cfg.meter);
        let analyzer = Arc::new(FrameAnalyzer::new(
            self.services.vision.clone(),
            self.cfg.min_severity,
        ));
        let state = FrameState {
            tracker: DamageTracker::new(self.cfg.dedup_window_frames),
            estimator: &estimator,
            frames_analyzed: 0,
            failed_frames: 0,
            raw_finding_count: 0,
        };
        let total_frames = jobs.total();
        let outcome = if self.cfg.frame_workers > 1 && total_frames > 1 {
            self.frame_loop_parallel(&video, jobs, analyzer, state)
        } else {
            self.frame_loop(&video, jobs, &analyzer, state)
        };

        let frames_analyzed = outcome.frames_analyzed;
        let detections = outcome.tracker.finish();
        if outcome.cancelled {
            info!("shutdown requested; stopping after {frames_analyzed} frames");
            return Err(cancelled(frames_analyzed, detections));
        }
        info!(
            "video analysis done: frames={} failed={} raw_findings={} detections={}",
            frames_analyzed,
            outcome.failed_frames,
            outcome.raw_finding_count,
            detections.len()
        );

        let mapper = CodeMapper::new(
            self.services.classifier.clone(),
            self.services.plausibility.clone(),
            allowed_codes,
            self.request.section_id.clone(),
        );
        let mapped_entries = match self.mapping_loop(&mapper, &detections) {
            Some(entries) => entries,
            None => {
                info!("shutdown requested during code mapping");
                return Err(cancelled(frames_analyzed, detections));
            }
        };

        let high_confidence_count = mapped_entries
            .iter()
            .filter(|e| e.confidence >= self.cfg.high_confidence_threshold)
            .count() as u64;
        let mut warnings = Vec::new();
        if detections.is_empty() {
            warnings.push(NO_DAMAGE_WARNING.to_string());
        }
        if outcome.failed_frames > 0 {
            warnings.push(format!(
                "{} of {} frames could not be analysed",
                outcome.failed_frames, total_frames
            ));
        }
        if outcome.lost_frames > 0 {
            warnings.push(format!(
                "{} of {} frames were not returned by the frame workers",
                outcome.lost_frames, total_frames
            ));
        }
        let failed_mappings = mapped_entries
            .iter()
            .filter(|e| e.suggested_code.is_none())
            .count();
        if failed_mappings > 0 {
            warnings.push(format!(
                "{failed_mappings} of {} detections have no code",
                detections.len()
            ));
        }
        warnings.extend(mapped_entries.iter().flat_map(|e| e.warnings.iter().cloned()));

        let stats = PipelineStats {
            frames_analyzed,
            duration_seconds: duration,
            raw_detection_count: detections.len() as u64,
            raw_finding_count: outcome.raw_finding_count,
            high_confidence_count,
            failed_frames: outcome.failed_frames,
        };
        info!(
            "run_summary frames_analyzed={} detections={} high_confidence={} failed_frames={}",
            stats.frames_analyzed,
            detections.len(),
            stats.high_confidence_count,
            stats.failed_frames
        );
        self.report(
            PipelinePhase::Done,
            detections.len() as u64,
            detections.len() as u64,
            format!("{} detections mapped", mapped_entries.len()),
            true,
        );

        Ok(PipelineResult {
            detections,
            mapped_entries,
            stats,
            warnings: dedupe_case_insensitive(warnings),
            error: None,
        })
    }

    fn resolve_video(&self) -> Result<PathBuf, PipelineError> {
        let video = normalize_video_path(&self.request.video)
            .ok_or_else(|| PipelineError::VideoNotFound(self.request.video.trim().to_string()))?;
        if !video.is_file() {
            return Err(PipelineError::VideoNotFound(video.display().to_string()));
        }
        Ok(video)
    }

    fn probe_duration(&self, video: &Path) -> Result<f64, PipelineError> {
        match self.services.decoder.probe_duration(video, &self.cancel_flag) {
            Ok(duration) if duration.is_finite() && duration > 0.0 => Ok(duration),
            Ok(duration) => Err(PipelineError::Duration(format!(
                "decoder reported non-positive duration {duration}"
            ))),
            Err(DecodeError::VideoNotFound(path)) => Err(PipelineError::VideoNotFound(path)),
            Err(DecodeError::Cancelled) => Err(cancelled(0, Vec::new())),
            Err(err @ DecodeError::DurationUnavailable { .. }) => {
                Err(PipelineError::Duration(err.to_string()))
            }
        }
    }

    fn frame_loop(
        &mut self,
        video: &Path,
        jobs: FrameSchedule,
        analyzer: &FrameAnalyzer,
        mut state: FrameState<'_>,
    ) -> FrameOutcome {
        let total = jobs.total();
        for job in jobs {
            if is_cancelled(&self.cancel_flag) {
                return state.finish(true);
            }
            let event = workers::process_frame(
                self.services.decoder.as_ref(),
                analyzer,
                video,
                job,
                &self.cancel_flag,
            );
            if matches!(event.result, FrameResult::Cancelled) {
                return state.finish(true);
            }
            state.apply(event);
            self.report_frame(&state, total);
        }
        state.finish(false)
    }

    fn frame_loop_parallel(
        &mut self,
        video: &Path,
        jobs: FrameSchedule,
        analyzer: Arc<FrameAnalyzer>,
        mut state: FrameState<'_>,
    ) -> FrameOutcome {
        let total = jobs.total();
        let step = jobs.step();
        let workers = self.cfg.frame_workers;
        let channel_cap = workers
            .saturating_mul(CHANNEL_CAPACITY_MULTIPLIER)
            .max(MIN_CHANNEL_CAPACITY);
        let (job_tx, job_rx) = bounded::<FrameJob>(channel_cap);
        let (event_tx, event_rx) = bounded::<FrameEvent>(channel_cap);

        let feeder = workers::spawn_feeder(jobs, job_tx, self.cancel_flag.clone());
        let handles = workers::spawn_frame_workers(
            workers,
            self.services.decoder.clone(),
            analyzer,
            video.to_path_buf(),
            job_rx,
            event_tx,
            self.cancel_flag.clone(),
        );

        let mut buffer = ReorderBuffer::new();
        let mut received = 0u64;
        let mut cancelled = false;
        'outer: while received < total {
            if is_cancelled(&self.cancel_flag) {
                cancelled = true;
                break;
            }
            match event_rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(event) => {
                    received += 1;
                    buffer.push(event);
                    while let Some(event) = buffer.pop_ready() {
                        if matches!(event.result, FrameResult::Cancelled) {
                            cancelled = true;
                            break 'outer;
                        }
                        state.apply(event);
                        self.report_frame(&state, total);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("frame workers exited early: received={received} expected={total}");
                    cancelled = is_cancelled(&self.cancel_flag);
                    break;
                }
            }
        }

        drop(event_rx);
        let _ = feeder.join();
        for handle in handles {
            let _ = handle.join();
        }
        if cancelled {
            if buffer.pending() > 0 {
                debug!("{} out-of-order frames discarded", buffer.pending());
            }
            return state.finish(true);
        }

        // Frames a worker never returned count as failed so the tracker
        // sees the same sequence as a sequential run.
        let lost_frames = total - received;
        for event in buffer.drain_through(total, |index| index as f64 * step) {
            state.apply(event);
            self.report_frame(&state, total);
        }
        state.finish_with_lost(lost_frames, false)
    }

    fn mapping_loop(
        &mut self,
        mapper: &CodeMapper,
        detections: &[Detection],
    ) -> Option<Vec<MappedEntry>> {
        let total = detections.len() as u64;
        let mut entries = Vec::with_capacity(detections.len());
        for (i, detection) in detections.iter().enumerate() {
            if is_cancelled(&self.cancel_flag) {
                return None;
            }
            let entry = mapper.map(detection, &self.cancel_flag).ok()?;
            entries.push(entry);
            let done = i as u64 + 1;
            self.report(
                PipelinePhase::CodeMapping,
                done,
                total,
                format!("mapped {done}/{total}: {}", detection.label),
                done == total,
            );
        }
        Some(entries)
    }

    fn report_frame(&mut self, state: &FrameState<'_>, total: u64) {
        let done = state.frames_analyzed;
        self.report(
            PipelinePhase::VideoAnalysis,
            done,
            total,
            format!(
                "frame {done}/{total}: {} open, {} closed",
                state.tracker.active_count(),
                state.tracker.completed_count()
            ),
            done == total,
        );
    }

    fn report(&mut self, phase: PipelinePhase, done: u64, total: u64, status: String, force: bool) {
        let Some(progress) = &self.progress else {
            return;
        };
        let due = force
            || progress.interval.is_zero()
            || self
                .last_progress
                .is_none_or(|last| last.elapsed() >= progress.interval);
        if !due {
            return;
        }
        progress.reporter.on_progress(&PipelineProgress {
            phase,
            done,
            total,
            status,
        });
        self.last_progress = Some(Instant::now());
    }
}

fn cancelled(frames_analyzed: u64, provisional: Vec<Detection>) -> PipelineError {
    PipelineError::Cancelled {
        frames_analyzed,
        provisional,
    }
}

/// Sampling offsets `0, step, 2*step, ... < duration`, produced on demand.
#[derive(Debug, Clone)]
pub struct FrameSchedule {
    step_seconds: f64,
    next: u64,
    count: u64,
}

impl FrameSchedule {
    /// Number of frames in the whole schedule, `ceil(duration / step)`.
    pub fn total(&self) -> u64 {
        self.count
    }

    pub fn step(&self) -> f64 {
        self.step_seconds
    }
}

impl Iterator for FrameSchedule {
    type Item = FrameJob;

    fn next(&mut self) -> Option<FrameJob> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(FrameJob {
            index,
            offset_seconds: index as f64 * self.step_seconds,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.count - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

pub fn frame_jobs(duration_seconds: f64, step_seconds: f64) -> FrameSchedule {
    let valid = duration_seconds.is_finite()
        && step_seconds.is_finite()
        && duration_seconds > 0.0
        && step_seconds > 0.0;
    let mut count = if valid {
        (duration_seconds / step_seconds).ceil() as u64
    } else {
        0
    };
    // Rounding in the division must not add an offset at or past the end.
    while count > 0 && (count - 1) as f64 * step_seconds >= duration_seconds {
        count -= 1;
    }
    FrameSchedule {
        step_seconds,
        next: 0,
        count,
    }
}
