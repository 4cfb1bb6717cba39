//! JSON schemas passed as the `format` of structured chat requests.

use once_cell::sync::Lazy;
use serde_json::{Value, json};

/// Reply shape for one inspection still.
pub static VISION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "meter": { "type": ["number", "null"] },
            "time_in_video": { "type": ["string", "null"] },
            "pipe_material": {
                "type": "string",
                "enum": ["concrete", "vitrified_clay", "pvc", "pe", "grp", "steel", "unknown"]
            },
            "pipe_diameter_mm": { "type": ["integer", "null"] },
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "code_hint": { "type": ["string", "null"] },
                        "severity": { "type": "integer", "minimum": 1, "maximum": 5 },
                        "position_clock": { "type": ["string", "null"] },
                        "extent_percent": { "type": ["number", "null"], "minimum": 0, "maximum": 100 },
                        "notes": { "type": ["string", "null"] }
                    },
                    "required": ["label", "severity"]
                }
            },
            "image_quality": { "type": "string", "enum": ["good", "medium", "poor"] },
            "is_empty_frame": { "type": "boolean" }
        },
        "required": ["findings", "image_quality", "is_empty_frame"]
    })
});

/// Reply shape for one code suggestion.
pub static SUGGESTION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "suggestedCode": { "type": ["string", "null"] },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "rationale": { "type": ["string", "null"] },
            "evidence": { "type": ["string", "null"] },
            "warnings": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["suggestedCode", "confidence"]
    })
});
