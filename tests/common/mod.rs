//! Shared test infrastructure for pipeline tests.
//!
//! Scripted stand-ins for the decoder and both inference capabilities, so a
//! whole run can be driven without ffmpeg or a model server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sewerscan::analyzer::{VisionInference, VisionReport};
use sewerscan::cancel::Cancelled;
use sewerscan::catalog::{CodeCatalog, StaticCatalog};
use sewerscan::config::Config;
use sewerscan::decoder::{DecodeError, Decoder};
use sewerscan::inference::InferenceError;
use sewerscan::mapper::{CodeClassifier, CodeSuggestion};
use sewerscan::pipeline::{PipelineProgress, PipelineServices, ProgressReporter};
use sewerscan::plausibility::{CatalogPlausibility, PlausibilityCheck};

// ============================================================================
// Helpers
// ============================================================================

fn offset_key(offset_seconds: f64) -> u64 {
    (offset_seconds * 1000.0).round() as u64
}

/// Image bytes the scripted decoder hands out for `offset_seconds`.
pub fn image_for(offset_seconds: f64) -> Vec<u8> {
    format!("frame@{}", offset_key(offset_seconds)).into_bytes()
}

fn offset_of(image: &[u8]) -> Option<u64> {
    std::str::from_utf8(image).ok()?.strip_prefix("frame@")?.parse().ok()
}

/// A file the pipeline will accept as an existing video.
pub fn video_file(dir: &Path) -> PathBuf {
    let path = dir.join("inspection.mp4");
    std::fs::write(&path, b"not decoded by the fakes").expect("write video");
    path
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.run_id = "test_run".to_string();
    cfg
}

pub fn allowed_codes() -> Vec<&'static str> {
    vec!["BAB", "BBA", "BCA", "BDB"]
}

// ============================================================================
// Decoder
// ============================================================================

pub struct ScriptedDecoder {
    duration: Result<f64, (String, String)>,
    failing_offsets: Vec<u64>,
    pub extract_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

impl ScriptedDecoder {
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration: Ok(duration),
            failing_offsets: Vec::new(),
            extract_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_duration(probe: &str, fallback: &str) -> Self {
        Self {
            duration: Err((probe.to_string(), fallback.to_string())),
            ..Self::with_duration(1.0)
        }
    }

    /// Decoding at these offsets yields no image.
    pub fn failing_at(mut self, offsets: &[f64]) -> Self {
        self.failing_offsets = offsets.iter().map(|o| offset_key(*o)).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst) + self.probe_calls.load(Ordering::SeqCst)
    }
}

impl Decoder for ScriptedDecoder {
    fn extract_frame(
        &self,
        _video: &Path,
        offset_seconds: f64,
        cancel: &AtomicBool,
    ) -> Result<Option<Vec<u8>>, Cancelled> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.load(Ordering::SeqCst) {
            return Err(Cancelled);
        }
        if self.failing_offsets.contains(&offset_key(offset_seconds)) {
            return Ok(None);
        }
        Ok(Some(image_for(offset_seconds)))
    }

    fn probe_duration(&self, _video: &Path, _cancel: &AtomicBool) -> Result<f64, DecodeError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        match &self.duration {
            Ok(d) => Ok(*d),
            Err((probe, fallback)) => Err(DecodeError::DurationUnavailable {
                probe: probe.clone(),
                fallback: fallback.clone(),
            }),
        }
    }
}

// ============================================================================
// Vision
// ============================================================================

#[derive(Clone)]
enum FrameScript {
    Findings {
        meter: Option<f64>,
        findings: Vec<(String, u8, Option<String>)>,
    },
    Error(String),
}

/// Vision fake keyed by frame offset; unscripted frames are empty.
#[derive(Default)]
pub struct ScriptedVision {
    frames: HashMap<u64, FrameScript>,
    panicking: Vec<u64>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    pub calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels with severity seen at `offset_seconds`.
    pub fn frame(mut self, offset_seconds: f64, findings: &[(&str, u8)]) -> Self {
        self.frames.insert(
            offset_key(offset_seconds),
            FrameScript::Findings {
                meter: None,
                findings: findings
                    .iter()
                    .map(|(l, s)| (l.to_string(), *s, None))
                    .collect(),
            },
        );
        self
    }

    pub fn frame_with_hint(
        mut self,
        offset_seconds: f64,
        label: &str,
        severity: u8,
        hint: &str,
    ) -> Self {
        self.frames.insert(
            offset_key(offset_seconds),
            FrameScript::Findings {
                meter: None,
                findings: vec![(label.to_string(), severity, Some(hint.to_string()))],
            },
        );
        self
    }

    pub fn frame_at_meter(
        mut self,
        offset_seconds: f64,
        meter: f64,
        findings: &[(&str, u8)],
    ) -> Self {
        self.frames.insert(
            offset_key(offset_seconds),
            FrameScript::Findings {
                meter: Some(meter),
                findings: findings
                    .iter()
                    .map(|(l, s)| (l.to_string(), *s, None))
                    .collect(),
            },
        );
        self
    }

    pub fn error_at(mut self, offset_seconds: f64, message: &str) -> Self {
        self.frames
            .insert(offset_key(offset_seconds), FrameScript::Error(message.to_string()));
        self
    }

    /// Panic the calling thread when this frame is analysed.
    pub fn panic_at(mut self, offset_seconds: f64) -> Self {
        self.panicking.push(offset_key(offset_seconds));
        self
    }

    /// Raise `flag` once `calls` frames have been analysed.
    pub fn cancel_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }
}

impl VisionInference for ScriptedVision {
    fn analyze_frame(
        &self,
        image: &[u8],
        _cancel: &AtomicBool,
    ) -> Result<VisionReport, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = &self.cancel_after {
            if call >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        let key = offset_of(image)
            .ok_or_else(|| InferenceError::Protocol("unexpected image".to_string()))?;
        if self.panicking.contains(&key) {
            panic!("scripted vision panic at frame@{key}");
        }
        let report = match self.frames.get(&key) {
            None => serde_json::json!({
                "findings": [],
                "image_quality": "good",
                "is_empty_frame": true,
            }),
            Some(FrameScript::Error(message)) => {
                return Err(InferenceError::Protocol(message.clone()));
            }
            Some(FrameScript::Findings { meter, findings }) => serde_json::json!({
                "meter": meter,
                "findings": findings
                    .iter()
                    .map(|(label, severity, hint)| serde_json::json!({
                        "label": label,
                        "severity": severity,
                        "code_hint": hint,
                    }))
                    .collect::<Vec<_>>(),
                "image_quality": "good",
                "is_empty_frame": false,
            }),
        };
        serde_json::from_value(report).map_err(|err| InferenceError::Malformed {
            reason: err.to_string(),
            raw: String::new(),
        })
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Classifier fake: picks a code per label, or fails for scripted labels.
#[derive(Default)]
pub struct ScriptedClassifier {
    codes: HashMap<String, (String, f64)>,
    failing_labels: Vec<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, label: &str, code: &str, confidence: f64) -> Self {
        self.codes
            .insert(label.to_lowercase(), (code.to_string(), confidence));
        self
    }

    pub fn failing_for(mut self, label: &str) -> Self {
        self.failing_labels.push(label.to_lowercase());
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }
}

fn label_in_prompt(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Finding: "))
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

impl CodeClassifier for ScriptedClassifier {
    fn classify(
        &self,
        prompt: &str,
        _allowed_codes: &[String],
        _schema: &serde_json::Value,
        _cancel: &AtomicBool,
    ) -> Result<CodeSuggestion, InferenceError> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        let label = label_in_prompt(prompt);
        if self.failing_labels.contains(&label) {
            return Err(InferenceError::Status {
                status: 503,
                body: "model unavailable".to_string(),
            });
        }
        let (code, confidence) = self
            .codes
            .get(&label)
            .cloned()
            .unwrap_or_else(|| ("BAB".to_string(), 0.6));
        Ok(CodeSuggestion {
            suggested_code: Some(code),
            confidence,
            rationale: Some(format!("matched {label}")),
            evidence: None,
            warnings: Vec::new(),
        })
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<PipelineProgress>>,
}

impl ProgressReporter for RecordingProgress {
    fn on_progress(&self, progress: &PipelineProgress) {
        self.events.lock().expect("lock").push(progress.clone());
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Fakes {
    pub decoder: Arc<ScriptedDecoder>,
    pub vision: Arc<ScriptedVision>,
    pub classifier: Arc<ScriptedClassifier>,
}

impl Fakes {
    pub fn new(
        decoder: ScriptedDecoder,
        vision: ScriptedVision,
        classifier: ScriptedClassifier,
    ) -> Self {
        Self {
            decoder: Arc::new(decoder),
            vision: Arc::new(vision),
            classifier: Arc::new(classifier),
        }
    }

    pub fn services(&self) -> PipelineServices {
        self.services_with_codes(&allowed_codes())
    }

    pub fn services_with_codes(&self, codes: &[&str]) -> PipelineServices {
        let catalog: Arc<dyn CodeCatalog> = Arc::new(StaticCatalog::new(codes.iter().copied()));
        let plausibility: Arc<dyn PlausibilityCheck> = Arc::new(CatalogPlausibility);
        PipelineServices {
            decoder: self.decoder.clone(),
            vision: self.vision.clone(),
            classifier: self.classifier.clone(),
            plausibility,
            catalog,
        }
    }

    pub fn external_calls(&self) -> usize {
        self.decoder.calls() + self.vision.calls.load(Ordering::SeqCst) + self.classifier.calls()
    }
}
