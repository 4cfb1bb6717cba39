use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;

use crate::constants::ERROR_BODY_LIMIT;
use crate::mapper::{CodeClassifier, CodeSuggestion};

use super::{ChatBackend, ChatMessage, ChatRequest, InferenceError, truncate_body};

const SYSTEM_PROMPT: &str = "You are an expert for sewer inspection coding. You map one observed \
pipe defect to exactly one code from the allowed list. Never invent codes. If none fits, return \
suggestedCode null with a low confidence and say why in warnings.";

/// [`CodeClassifier`] over a structured chat backend.
pub struct ChatClassifier {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl ChatClassifier {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

/// Narrow `suggestedCode` to the allowed codes (or null) when the schema has that field.
fn constrain_schema(schema: &Value, allowed_codes: &[String]) -> Value {
    let mut schema = schema.clone();
    if allowed_codes.is_empty() {
        return schema;
    }
    if let Some(code) = schema.pointer_mut("/properties/suggestedCode") {
        let mut values: Vec<Value> = allowed_codes.iter().cloned().map(Value::String).collect();
        values.push(Value::Null);
        if let Some(obj) = code.as_object_mut() {
            obj.insert("enum".to_string(), Value::Array(values));
        }
    }
    schema
}

impl CodeClassifier for ChatClassifier {
    fn classify(
        &self,
        prompt: &str,
        allowed_codes: &[String],
        schema: &Value,
        cancel: &AtomicBool,
    ) -> Result<CodeSuggestion, InferenceError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            format: constrain_schema(schema, allowed_codes),
        };
        let content = self.backend.chat_structured(&request, cancel)?;
        serde_json::from_str(&content).map_err(|err| InferenceError::Malformed {
            reason: err.to_string(),
            raw: truncate_body(&content, ERROR_BODY_LIMIT),
        })
    }
}
