//! Post-processing of raw code suggestions before they are recorded.

use crate::catalog::normalize_code;
use crate::constants::{MAX_SECTION_LENGTH_M, UNKNOWN_CODE_PENALTY};
use crate::mapper::CodeSuggestion;
use crate::tracker::SeverityClass;

/// What the mapper knew about the observation when it asked for a code.
#[derive(Debug, Clone, Copy)]
pub struct ObservationContext<'a> {
    pub label: &'a str,
    pub severity_class: SeverityClass,
    pub meter_start: f64,
    pub meter_end: f64,
    pub code_hint: Option<&'a str>,
    pub allowed_codes: &'a [String],
}

pub trait PlausibilityCheck: Send + Sync {
    fn check(&self, suggestion: CodeSuggestion, ctx: &ObservationContext<'_>) -> CodeSuggestion;
}

/// Passes suggestions through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlausibility;

impl PlausibilityCheck for NoopPlausibility {
    fn check(&self, suggestion: CodeSuggestion, _ctx: &ObservationContext<'_>) -> CodeSuggestion {
        suggestion
    }
}

/// Rule-based check against the allowed catalog and section geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogPlausibility;

impl PlausibilityCheck for CatalogPlausibility {
    fn check(
        &self,
        mut suggestion: CodeSuggestion,
        ctx: &ObservationContext<'_>,
    ) -> CodeSuggestion {
        suggestion.suggested_code = suggestion
            .suggested_code
            .as_deref()
            .map(normalize_code)
            .filter(|c| !c.is_empty());

        if let Some(code) = &suggestion.suggested_code {
            if !ctx.allowed_codes.iter().any(|allowed| allowed == code) {
                suggestion.confidence -= UNKNOWN_CODE_PENALTY;
                suggestion
                    .warnings
                    .push(format!("suggested code {code} is not in the catalog"));
            }
        }
        if ctx.meter_start < 0.0 {
            suggestion
                .warnings
                .push(format!("meter start {:.2} is below zero", ctx.meter_start));
        }
        if ctx.meter_end > MAX_SECTION_LENGTH_M {
            suggestion.warnings.push(format!(
                "meter end {:.2} exceeds {MAX_SECTION_LENGTH_M} m",
                ctx.meter_end
            ));
        }

        suggestion.confidence = if suggestion.confidence.is_nan() {
            0.0
        } else {
            suggestion.confidence.clamp(0.0, 1.0)
        };
        suggestion
    }
}
