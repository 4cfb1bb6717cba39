use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::cancel::is_cancelled;
use crate::constants::{CANCEL_POLL_INTERVAL, ERROR_BODY_LIMIT};

use super::{ChatBackend, ChatRequest, InferenceError, truncate_body};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Blocking client for `POST {base_url}/api/chat`.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "format": request.format,
        });
        let response = self.client.post(&self.endpoint).json(&payload).send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: truncate_body(&body, ERROR_BODY_LIMIT),
            });
        }
        extract_content(&body)
    }
}

impl ChatBackend for OllamaClient {
    fn chat_structured(
        &self,
        request: &ChatRequest,
        cancel: &AtomicBool,
    ) -> Result<String, InferenceError> {
        if is_cancelled(cancel) {
            return Err(InferenceError::Cancelled);
        }

        // The blocking call runs on a helper thread; on cancel its result is dropped.
        let (tx, rx) = bounded(1);
        let client = self.clone();
        let request = request.clone();
        thread::spawn(move || {
            let _ = tx.send(client.send(&request));
        });

        loop {
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if is_cancelled(cancel) {
                        debug!("abandoning in-flight chat request to {}", self.endpoint);
                        return Err(InferenceError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(InferenceError::Protocol(
                        "chat worker exited without a result".to_string(),
                    ));
                }
            }
        }
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/api/chat", base_url.trim().trim_end_matches('/'))
}

fn extract_content(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|err| InferenceError::Malformed {
        reason: format!("response is not a chat reply: {err}"),
        raw: truncate_body(body, ERROR_BODY_LIMIT),
    })?;
    let content = parsed
        .message
        .map(|m| m.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(InferenceError::Protocol(
            "chat reply has no message content".to_string(),
        ));
    }
    Ok(content)
}
