//! # Inference
//!
//! Structured chat calls against an Ollama-compatible server, plus the
//! vision and classification adapters built on top of them.

pub mod classifier;
pub mod ollama;
pub mod schema;
pub mod vision;

use std::sync::atomic::AtomicBool;

use serde::Serialize;
use thiserror::Error;

use crate::cancel::Cancelled;

pub use classifier::ChatClassifier;
pub use ollama::OllamaClient;
pub use vision::ChatVision;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed model output ({reason}): {raw}")]
    Malformed { reason: String, raw: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for InferenceError {
    fn from(_: Cancelled) -> Self {
        InferenceError::Cancelled
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Base64 encoded images; omitted from the payload when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, base64_image: String) -> Self {
        self.images.push(base64_image);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// JSON schema the reply must conform to.
    pub format: serde_json::Value,
}

/// One schema-constrained, non-streaming chat completion.
pub trait ChatBackend: Send + Sync {
    /// Returns the assistant message content (the JSON document as text).
    fn chat_structured(
        &self,
        request: &ChatRequest,
        cancel: &AtomicBool,
    ) -> Result<String, InferenceError>;
}

/// Keep error bodies readable in logs.
pub(crate) fn truncate_body(body: &str, limit: usize) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut end = limit;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_images_omits_field() {
        let json = serde_json::to_value(ChatMessage::user("hi")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let json =
            serde_json::to_value(ChatMessage::user("look").with_image("aGk=".to_string()))
                .expect("serialize");
        assert_eq!(json["images"], serde_json::json!(["aGk="]));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("  short ", 10), "short");
        let long = "ä".repeat(10);
        let cut = truncate_body(&long, 5);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 8);
    }
}
