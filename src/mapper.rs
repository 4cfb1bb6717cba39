//! # Code Mapper
//!
//! Asks a text model for one catalog code per closed detection, then runs
//! the answer through a plausibility check. Every detection gets exactly
//! one [`MappedEntry`], whether or not the model call succeeded.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::Cancelled;
use crate::inference::InferenceError;
use crate::inference::schema::SUGGESTION_SCHEMA;
use crate::plausibility::{ObservationContext, PlausibilityCheck};
use crate::tracker::Detection;
use crate::util::{dedupe_case_insensitive, null_as_default};

/// Raw suggestion as returned by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSuggestion {
    #[serde(default)]
    pub suggested_code: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
}

/// Text classification capability.
pub trait CodeClassifier: Send + Sync {
    fn classify(
        &self,
        prompt: &str,
        allowed_codes: &[String],
        schema: &serde_json::Value,
        cancel: &AtomicBool,
    ) -> Result<CodeSuggestion, InferenceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedEntry {
    pub detection: Detection,
    pub suggested_code: Option<String>,
    pub confidence: f64,
    pub rationale: Option<String>,
    pub evidence: Option<String>,
    pub warnings: Vec<String>,
}

impl MappedEntry {
    fn failed(detection: &Detection, message: String) -> Self {
        Self {
            detection: detection.clone(),
            suggested_code: None,
            confidence: 0.0,
            rationale: Some(message.clone()),
            evidence: None,
            warnings: vec![format!("Code mapping failed: {message}")],
        }
    }
}

pub struct CodeMapper {
    classifier: Arc<dyn CodeClassifier>,
    plausibility: Arc<dyn PlausibilityCheck>,
    allowed_codes: Vec<String>,
    section_id: Option<String>,
}

impl CodeMapper {
    pub fn new(
        classifier: Arc<dyn CodeClassifier>,
        plausibility: Arc<dyn PlausibilityCheck>,
        allowed_codes: Vec<String>,
        section_id: Option<String>,
    ) -> Self {
        Self {
            classifier,
            plausibility,
            allowed_codes,
            section_id: section_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn build_prompt(&self, detection: &Detection) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Answer only with the given JSON schema.");
        let _ = writeln!(prompt, "Choose exactly ONE code from 'Allowed codes'.");
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Finding: {}", detection.label);
        let _ = writeln!(
            prompt,
            "Severity: {} ({} of 5)",
            detection.severity_class.as_str(),
            detection.max_severity
        );
        let _ = writeln!(
            prompt,
            "Meter range: {:.2}m - {:.2}m",
            detection.meter_start, detection.meter_end
        );
        if let Some(section) = &self.section_id {
            let _ = writeln!(prompt, "Section: {section}");
        }
        if let Some(hint) = &detection.code_hint {
            let _ = writeln!(prompt, "Vision code hint (prioritize if plausible): {hint}");
        }
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Allowed codes: {}", self.allowed_codes.join(", "));
        let _ = writeln!(
            prompt,
            "Produce: suggestedCode, confidence (0.0-1.0), rationale, evidence, warnings."
        );
        prompt
    }

    /// Map one detection. Only cancellation escapes as an error.
    pub fn map(
        &self,
        detection: &Detection,
        cancel: &AtomicBool,
    ) -> Result<MappedEntry, Cancelled> {
        let prompt = self.build_prompt(detection);
        let raw = match self.classifier.classify(
            &prompt,
            &self.allowed_codes,
            &SUGGESTION_SCHEMA,
            cancel,
        ) {
            Ok(raw) => raw,
            Err(InferenceError::Cancelled) => return Err(Cancelled),
            Err(err) => {
                warn!("code mapping failed for '{}': {err}", detection.label);
                return Ok(MappedEntry::failed(detection, err.to_string()));
            }
        };

        let ctx = ObservationContext {
            label: &detection.label,
            severity_class: detection.severity_class,
            meter_start: detection.meter_start,
            meter_end: detection.meter_end,
            code_hint: detection.code_hint.as_deref(),
            allowed_codes: &self.allowed_codes,
        };
        let checked = self.plausibility.check(sanitize(raw), &ctx);
        let entry = finalize(detection, checked);
        debug!(
            "mapped '{}' -> {:?} ({:.2})",
            detection.label, entry.suggested_code, entry.confidence
        );
        Ok(entry)
    }
}

fn sanitize(mut suggestion: CodeSuggestion) -> CodeSuggestion {
    suggestion.suggested_code = non_blank(suggestion.suggested_code);
    suggestion.confidence = clamp_confidence(suggestion.confidence);
    suggestion.rationale = non_blank(suggestion.rationale);
    suggestion.evidence = non_blank(suggestion.evidence);
    suggestion
}

fn finalize(detection: &Detection, suggestion: CodeSuggestion) -> MappedEntry {
    let warnings = dedupe_case_insensitive(
        suggestion
            .warnings
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty()),
    );
    MappedEntry {
        detection: detection.clone(),
        suggested_code: non_blank(suggestion.suggested_code),
        confidence: clamp_confidence(suggestion.confidence),
        rationale: suggestion.rationale,
        evidence: suggestion.evidence,
        warnings,
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
