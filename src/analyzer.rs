//! # Per-Frame Damage Analyzer
//!
//! Turns one decoded still into a clean list of [`FrameFinding`]s. The raw
//! model reply is normalised here so the tracker only ever sees trimmed
//! labels and in-range severities.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::Cancelled;
use crate::constants::{SEVERITY_MAX, SEVERITY_MIN};
use crate::inference::InferenceError;
use crate::util::null_as_default;

/// Vision capability: one still in, one structured report out.
pub trait VisionInference: Send + Sync {
    fn analyze_frame(
        &self,
        image: &[u8],
        cancel: &AtomicBool,
    ) -> Result<VisionReport, InferenceError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeMaterial {
    Concrete,
    VitrifiedClay,
    Pvc,
    Pe,
    Grp,
    Steel,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    Good,
    Poor,
    #[default]
    #[serde(other)]
    Medium,
}

/// Reply of the vision model, as sent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionReport {
    #[serde(default)]
    pub meter: Option<f64>,
    #[serde(default)]
    pub time_in_video: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pipe_material: PipeMaterial,
    #[serde(default)]
    pub pipe_diameter_mm: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub findings: Vec<RawFinding>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_quality: ImageQuality,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_empty_frame: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFinding {
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default)]
    pub code_hint: Option<String>,
    #[serde(default)]
    pub severity: Option<f64>,
    #[serde(default)]
    pub position_clock: Option<String>,
    #[serde(default)]
    pub extent_percent: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One normalised finding on one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameFinding {
    pub label: String,
    pub severity: u8,
    pub clock_position: Option<String>,
    pub extent_percent: Option<f64>,
    pub code_hint: Option<String>,
    pub notes: Option<String>,
}

impl FrameFinding {
    pub fn new(label: impl Into<String>, severity: u8) -> Self {
        Self {
            label: label.into(),
            severity: severity.clamp(SEVERITY_MIN, SEVERITY_MAX),
            clock_position: None,
            extent_percent: None,
            code_hint: None,
            notes: None,
        }
    }

    pub fn with_code_hint(mut self, hint: impl Into<String>) -> Self {
        self.code_hint = non_blank(Some(hint.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    /// On-screen meter reading, if the model reported a finite one.
    pub meter: Option<f64>,
    pub material: PipeMaterial,
    pub diameter_mm: Option<f64>,
    pub findings: Vec<FrameFinding>,
    pub image_quality: ImageQuality,
    pub is_empty: bool,
    /// Set when the frame could not be analysed; findings are then empty.
    pub error: Option<String>,
}

impl FrameAnalysis {
    pub fn empty(error: Option<String>) -> Self {
        Self {
            meter: None,
            material: PipeMaterial::Unknown,
            diameter_mm: None,
            findings: Vec::new(),
            image_quality: ImageQuality::Poor,
            is_empty: true,
            error,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn from_report(report: VisionReport, min_severity: u8) -> Self {
        let findings = report
            .findings
            .into_iter()
            .filter_map(normalize_finding)
            .filter(|f| f.severity >= min_severity)
            .collect();
        Self {
            meter: report.meter.filter(|m| m.is_finite()),
            material: report.pipe_material,
            diameter_mm: report.pipe_diameter_mm.filter(|d| d.is_finite() && *d > 0.0),
            findings,
            image_quality: report.image_quality,
            is_empty: report.is_empty_frame,
            error: None,
        }
    }
}

fn normalize_finding(raw: RawFinding) -> Option<FrameFinding> {
    let label = raw.label.trim();
    if label.is_empty() {
        return None;
    }
    Some(FrameFinding {
        label: label.to_string(),
        severity: clamp_severity(raw.severity),
        clock_position: non_blank(raw.position_clock),
        extent_percent: raw
            .extent_percent
            .filter(|e| e.is_finite())
            .map(|e| e.clamp(0.0, 100.0)),
        code_hint: non_blank(raw.code_hint),
        notes: non_blank(raw.notes),
    })
}

fn clamp_severity(raw: Option<f64>) -> u8 {
    match raw {
        Some(value) if value.is_finite() => {
            value.round().clamp(SEVERITY_MIN as f64, SEVERITY_MAX as f64) as u8
        }
        _ => SEVERITY_MIN,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct FrameAnalyzer {
    vision: Arc<dyn VisionInference>,
    min_severity: u8,
}

impl FrameAnalyzer {
    pub fn new(vision: Arc<dyn VisionInference>, min_severity: u8) -> Self {
        Self {
            vision,
            min_severity: min_severity.clamp(SEVERITY_MIN, SEVERITY_MAX),
        }
    }

    /// Analyse one still. Every failure except cancellation comes back in-band.
    pub fn analyze(&self, image: &[u8], cancel: &AtomicBool) -> Result<FrameAnalysis, Cancelled> {
        match self.vision.analyze_frame(image, cancel) {
            Ok(report) => {
                let analysis = FrameAnalysis::from_report(report, self.min_severity);
                debug!(
                    "frame analysed: findings={} meter={:?} quality={:?}",
                    analysis.findings.len(),
                    analysis.meter,
                    analysis.image_quality
                );
                Ok(analysis)
            }
            Err(InferenceError::Cancelled) => Err(Cancelled),
            Err(err) => {
                warn!("frame analysis failed: {err}");
                Ok(FrameAnalysis::empty(Some(err.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    struct Fixed(fn() -> Result<VisionReport, InferenceError>);

    impl VisionInference for Fixed {
        fn analyze_frame(
            &self,
            _image: &[u8],
            _cancel: &AtomicBool,
        ) -> Result<VisionReport, InferenceError> {
            (self.0)()
        }
    }

    fn report_from(json: &str) -> VisionReport {
        serde_json::from_str(json).expect("report json")
    }

    #[test]
    fn normalises_model_output() {
        let report = report_from(
            r#"{
                "meter": 12.5,
                "pipe_material": "vitrified_clay",
                "findings": [
                    {"label": "  Crack ", "severity": 7, "extent_percent": 140, "position_clock": " 3 ", "code_hint": " "},
                    {"label": "   ", "severity": 3},
                    {"label": "Root", "severity": 0.2, "code_hint": "BBA"}
                ],
                "image_quality": "good",
                "is_empty_frame": false
            }"#,
        );
        let analysis = FrameAnalysis::from_report(report, 1);
        assert_eq!(analysis.meter, Some(12.5));
        assert_eq!(analysis.material, PipeMaterial::VitrifiedClay);
        assert_eq!(analysis.findings.len(), 2);
        let crack = &analysis.findings[0];
        assert_eq!(crack.label, "Crack");
        assert_eq!(crack.severity, 5);
        assert_eq!(crack.extent_percent, Some(100.0));
        assert_eq!(crack.clock_position.as_deref(), Some("3"));
        assert_eq!(crack.code_hint, None);
        assert_eq!(analysis.findings[1].severity, 1);
        assert_eq!(analysis.findings[1].code_hint.as_deref(), Some("BBA"));
    }

    #[test]
    fn tolerates_nulls_and_unknown_enums() {
        let report = report_from(
            r#"{"pipe_material": "asbestos", "findings": null, "image_quality": null, "is_empty_frame": true}"#,
        );
        assert_eq!(report.pipe_material, PipeMaterial::Unknown);
        assert_eq!(report.image_quality, ImageQuality::Medium);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn drops_findings_below_min_severity() {
        let report = report_from(
            r#"{"findings": [{"label": "a", "severity": 1}, {"label": "b", "severity": 3}]}"#,
        );
        let analysis = FrameAnalysis::from_report(report, 3);
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].label, "b");
    }

    #[test]
    fn transport_failure_is_in_band() {
        let analyzer = FrameAnalyzer::new(
            Arc::new(Fixed(|| Err(InferenceError::Protocol("boom".into())))),
            1,
        );
        let cancel = AtomicBool::new(false);
        let analysis = analyzer.analyze(b"png", &cancel).expect("not cancelled");
        assert!(analysis.failed());
        assert!(analysis.findings.is_empty());
    }

    #[test]
    fn cancellation_propagates() {
        let analyzer = FrameAnalyzer::new(Arc::new(Fixed(|| Err(InferenceError::Cancelled))), 1);
        let cancel = AtomicBool::new(false);
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(analyzer.analyze(b"png", &cancel), Err(Cancelled));
    }
}
