use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::analyzer::{VisionInference, VisionReport};
use crate::constants::ERROR_BODY_LIMIT;

use super::schema::VISION_SCHEMA;
use super::{ChatBackend, ChatMessage, ChatRequest, InferenceError, truncate_body};

const VISION_PROMPT: &str = "You are reviewing one still image from a sewer pipe CCTV inspection. \
Report the meter reading shown in the on-screen overlay if one is visible, the pipe material and \
diameter if recognisable, and every visible defect as a finding with a short label, a severity from \
1 (cosmetic) to 5 (structural failure), its clock position, the percentage of the circumference it \
covers, and a defect code if you are confident. Use the same label wording for the same kind of \
defect. Mark the frame empty if it shows no pipe interior. Answer with JSON only.";

/// [`VisionInference`] over a structured chat backend.
pub struct ChatVision {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl ChatVision {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    fn request_for(&self, image: &[u8]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(VISION_PROMPT).with_image(STANDARD.encode(image))],
            format: VISION_SCHEMA.clone(),
        }
    }
}

impl VisionInference for ChatVision {
    fn analyze_frame(
        &self,
        image: &[u8],
        cancel: &AtomicBool,
    ) -> Result<VisionReport, InferenceError> {
        let content = self
            .backend
            .chat_structured(&self.request_for(image), cancel)?;
        serde_json::from_str(&content).map_err(|err| InferenceError::Malformed {
            reason: err.to_string(),
            raw: truncate_body(&content, ERROR_BODY_LIMIT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        reply: String,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ChatBackend for Recording {
        fn chat_structured(
            &self,
            request: &ChatRequest,
            _cancel: &AtomicBool,
        ) -> Result<String, InferenceError> {
            self.seen.lock().expect("lock").push(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn sends_image_and_schema() {
        let backend = Arc::new(Recording {
            reply: r#"{"findings":[{"label":"crack","severity":2}],"image_quality":"good","is_empty_frame":false}"#.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let vision = ChatVision::new(backend.clone(), "vision-model");
        let cancel = AtomicBool::new(false);
        let report = vision.analyze_frame(b"\x89PNG", &cancel).expect("report");
        assert_eq!(report.findings.len(), 1);

        let seen = backend.seen.lock().expect("lock");
        assert_eq!(seen[0].model, "vision-model");
        assert_eq!(seen[0].messages[0].images, vec![STANDARD.encode(b"\x89PNG")]);
        assert_eq!(seen[0].format, *VISION_SCHEMA);
    }

    #[test]
    fn unparseable_reply_is_malformed() {
        let backend = Arc::new(Recording {
            reply: "not json".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let vision = ChatVision::new(backend, "m");
        let cancel = AtomicBool::new(false);
        assert!(matches!(
            vision.analyze_frame(b"x", &cancel),
            Err(InferenceError::Malformed { .. })
        ));
    }
}
