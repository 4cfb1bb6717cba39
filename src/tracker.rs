//! # Active-Finding Tracker
//!
//! Streaming merge of per-frame findings into meter-anchored detections.
//!
//! Frames must be fed strictly in timestamp order. Each label that appears
//! opens (or extends) an active finding; a finding closes once it has been
//! absent for `dedup_window` consecutive frames, or when the stream ends.
//! Labels are matched case-insensitively after trimming, nothing fuzzier.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::analyzer::FrameFinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    Low,
    Mid,
    High,
}

impl SeverityClass {
    pub fn from_severity(severity: u8) -> Self {
        match severity {
            4.. => SeverityClass::High,
            3 => SeverityClass::Mid,
            _ => SeverityClass::Low,
        }
    }

    /// Detection confidence implied by the class alone.
    pub fn heuristic_confidence(self) -> f64 {
        match self {
            SeverityClass::High => 0.90,
            SeverityClass::Mid => 0.70,
            SeverityClass::Low => 0.50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeverityClass::Low => "low",
            SeverityClass::Mid => "mid",
            SeverityClass::High => "high",
        }
    }
}

/// A closed defect observation spanning a meter range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub meter_start: f64,
    pub meter_end: f64,
    pub severity_class: SeverityClass,
    pub code_hint: Option<String>,
    pub max_severity: u8,
    pub time_start_seconds: f64,
    pub time_end_seconds: f64,
    pub frames_observed: u32,
}

#[derive(Debug, Clone)]
struct ActiveFinding {
    key: String,
    label: String,
    meter_first: f64,
    meter_last: f64,
    max_severity: u8,
    code_hint: Option<String>,
    missed_frames: u32,
    time_first: f64,
    time_last: f64,
    frames_observed: u32,
}

impl ActiveFinding {
    fn open(key: String, finding: &FrameFinding, meter: f64, time_seconds: f64) -> Self {
        Self {
            key,
            label: finding.label.trim().to_string(),
            meter_first: meter,
            meter_last: meter,
            max_severity: finding.severity,
            code_hint: finding.code_hint.clone(),
            missed_frames: 0,
            time_first: time_seconds,
            time_last: time_seconds,
            frames_observed: 1,
        }
    }

    fn extend(&mut self, finding: &FrameFinding, meter: f64, time_seconds: f64) {
        self.meter_last = meter;
        self.time_last = time_seconds;
        self.missed_frames = 0;
        self.max_severity = self.max_severity.max(finding.severity);
        if finding.code_hint.is_some() {
            self.code_hint = finding.code_hint.clone();
        }
        self.frames_observed = self.frames_observed.saturating_add(1);
    }

    fn into_detection(self) -> Detection {
        Detection {
            label: self.label,
            meter_start: self.meter_first.min(self.meter_last),
            meter_end: self.meter_first.max(self.meter_last),
            severity_class: SeverityClass::from_severity(self.max_severity),
            code_hint: self.code_hint,
            max_severity: self.max_severity,
            time_start_seconds: self.time_first,
            time_end_seconds: self.time_last,
            frames_observed: self.frames_observed,
        }
    }
}

/// Join key for labels across frames.
pub fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

pub struct DamageTracker {
    dedup_window: u32,
    /// Creation order.
    active: Vec<ActiveFinding>,
    completed: Vec<Detection>,
}

impl DamageTracker {
    pub fn new(dedup_window: u32) -> Self {
        Self {
            dedup_window: dedup_window.max(1),
            active: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// Feed one analysed frame at meter position `meter`.
    pub fn observe(&mut self, meter: f64, time_seconds: f64, findings: &[FrameFinding]) {
        let current = fold_frame(findings);
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(current.len());
        for (i, (key, _)) in current.iter().enumerate() {
            index.insert(key.as_str(), i);
        }

        let mut matched = vec![false; current.len()];
        let window = self.dedup_window;
        let mut still_active = Vec::with_capacity(self.active.len() + current.len());
        for mut finding in self.active.drain(..) {
            if let Some(&i) = index.get(finding.key.as_str()) {
                finding.extend(&current[i].1, meter, time_seconds);
                matched[i] = true;
                still_active.push(finding);
            } else {
                finding.missed_frames += 1;
                if finding.missed_frames >= window {
                    debug!(
                        "closing '{}' after {} missed frames",
                        finding.label, finding.missed_frames
                    );
                    self.completed.push(finding.into_detection());
                } else {
                    still_active.push(finding);
                }
            }
        }

        for (i, (key, finding)) in current.iter().enumerate() {
            if !matched[i] {
                still_active.push(ActiveFinding::open(key.clone(), finding, meter, time_seconds));
            }
        }
        self.active = still_active;
    }

    /// A frame that could not be decoded or analysed counts as an empty frame.
    pub fn skip_frame(&mut self) {
        self.observe(0.0, 0.0, &[]);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Close every remaining finding and return all detections by `meter_start`.
    pub fn finish(mut self) -> Vec<Detection> {
        let remaining = std::mem::take(&mut self.active);
        self.completed
            .extend(remaining.into_iter().map(ActiveFinding::into_detection));
        let mut detections = self.completed;
        detections.sort_by(|a, b| a.meter_start.total_cmp(&b.meter_start));
        detections
    }
}

/// Collapse repeated labels within one frame: max severity, last non-empty hint.
fn fold_frame(findings: &[FrameFinding]) -> Vec<(String, FrameFinding)> {
    let mut folded: Vec<(String, FrameFinding)> = Vec::with_capacity(findings.len());
    for finding in findings {
        let key = label_key(&finding.label);
        if key.is_empty() {
            continue;
        }
        match folded.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.severity = existing.severity.max(finding.severity);
                if finding.code_hint.is_some() {
                    existing.code_hint = finding.code_hint.clone();
                }
            }
            None => folded.push((key, finding.clone())),
        }
    }
    folded
}
