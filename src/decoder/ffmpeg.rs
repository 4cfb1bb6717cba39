use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::cancel::Cancelled;
use crate::config::DecoderConfig;
use crate::decoder::process::{ProcessError, run_cancellable};
use crate::decoder::{DecodeError, Decoder};

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d+):(\d+(?:\.\d+)?)").expect("duration pattern")
});

/// ffmpeg/ffprobe backed [`Decoder`].
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
    max_frame_width: u32,
}

impl FfmpegDecoder {
    pub fn new(cfg: &DecoderConfig) -> Self {
        let ffmpeg = if cfg.ffmpeg_path.trim().is_empty() {
            "ffmpeg".to_string()
        } else {
            cfg.ffmpeg_path.trim().to_string()
        };
        let ffprobe = cfg
            .ffprobe_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_ffprobe_path(&ffmpeg));
        Self {
            ffmpeg,
            ffprobe,
            max_frame_width: cfg.max_frame_width.max(16),
        }
    }

    pub fn ffmpeg(&self) -> &str {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &str {
        &self.ffprobe
    }

    fn probe_with_ffprobe(&self, video: &Path, cancel: &AtomicBool) -> Result<f64, ProbeFailure> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video);
        let output = run_cancellable(cmd, cancel)?;
        if !output.status.success() {
            let stderr = output.stderr_text();
            let reason = if stderr.trim().is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(ProbeFailure::Failed(reason));
        }
        let stdout = output.stdout_text();
        parse_probe_output(&stdout).ok_or_else(|| {
            ProbeFailure::Failed(format!("unparseable ffprobe output '{}'", stdout.trim()))
        })
    }

    fn probe_with_ffmpeg(&self, video: &Path, cancel: &AtomicBool) -> Result<f64, ProbeFailure> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner").arg("-i").arg(video);
        // ffmpeg exits non-zero without an output file; the banner is still printed.
        let output = run_cancellable(cmd, cancel)?;
        parse_duration_diagnostics(&output.stderr_text())
            .ok_or_else(|| ProbeFailure::Failed("no Duration line in ffmpeg output".to_string()))
    }
}

enum ProbeFailure {
    Failed(String),
    Cancelled,
}

impl From<ProcessError> for ProbeFailure {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled => ProbeFailure::Cancelled,
            other => ProbeFailure::Failed(other.to_string()),
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn extract_frame(
        &self,
        video: &Path,
        offset_seconds: f64,
        cancel: &AtomicBool,
    ) -> Result<Option<Vec<u8>>, Cancelled> {
        if !video.is_file() {
            return Ok(None);
        }
        // Removed on drop, whichever way this function exits.
        let out = match tempfile::Builder::new()
            .prefix("sewerscan_frame_")
            .suffix(".png")
            .tempfile()
        {
            Ok(file) => file,
            Err(err) => {
                warn!("failed to create frame temp file: {err}");
                return Ok(None);
            }
        };

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format_offset(offset_seconds))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale='min({},iw)':-2", self.max_frame_width))
            .arg("-y")
            .arg(out.path());

        let output = match run_cancellable(cmd, cancel) {
            Ok(output) => output,
            Err(ProcessError::Cancelled) => return Err(Cancelled),
            Err(err) => {
                warn!("frame extraction at {offset_seconds:.2}s failed: {err}");
                return Ok(None);
            }
        };
        if !output.status.success() {
            debug!(
                "ffmpeg exited with {} at {offset_seconds:.2}s: {}",
                output.status,
                output.stderr_text().trim()
            );
            return Ok(None);
        }

        match std::fs::read(out.path()) {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(err) => {
                debug!("decoded frame unreadable at {offset_seconds:.2}s: {err}");
                Ok(None)
            }
        }
    }

    fn probe_duration(&self, video: &Path, cancel: &AtomicBool) -> Result<f64, DecodeError> {
        if !video.is_file() {
            return Err(DecodeError::VideoNotFound(video.display().to_string()));
        }

        let probe_reason = match self.probe_with_ffprobe(video, cancel) {
            Ok(duration) => return Ok(duration),
            Err(ProbeFailure::Cancelled) => return Err(DecodeError::Cancelled),
            Err(ProbeFailure::Failed(reason)) => reason,
        };
        debug!("ffprobe could not determine duration ({probe_reason}); trying ffmpeg");

        match self.probe_with_ffmpeg(video, cancel) {
            Ok(duration) => Ok(duration),
            Err(ProbeFailure::Cancelled) => Err(DecodeError::Cancelled),
            Err(ProbeFailure::Failed(fallback)) => Err(DecodeError::DurationUnavailable {
                probe: probe_reason,
                fallback,
            }),
        }
    }
}

/// `ffprobe` next to an absolute `ffmpeg`, else the bare name on PATH.
pub fn derive_ffprobe_path(ffmpeg: &str) -> String {
    let path = Path::new(ffmpeg);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let file_name = format!("ffprobe{ext}");
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            PathBuf::from(dir).join(file_name).to_string_lossy().into_owned()
        }
        _ => file_name,
    }
}

/// Parse the bare seconds value printed by ffprobe; non-positive counts as missing.
pub fn parse_probe_output(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Scrape `Duration: HH:MM:SS.ss` from ffmpeg's diagnostic text.
pub fn parse_duration_diagnostics(text: &str) -> Option<f64> {
    let caps = DURATION_PATTERN.captures(text)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total > 0.0).then_some(total)
}

fn format_offset(offset_seconds: f64) -> String {
    format!("{:.3}", offset_seconds.max(0.0))
}
