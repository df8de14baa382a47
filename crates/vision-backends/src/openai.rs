//! Hosted vision-language-model backend.
//!
//! Sends the screenshot inline (base64) with a textual instruction to a
//! chat-completion endpoint and surfaces the model's free-text answer as the
//! label of a single result. The model does not guarantee a position for its
//! answer, so the bounding box is caller-assumed (the whole capture); this
//! variant suits whole-image extraction such as OCR, not precise
//! localization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flowpilot_core_types::BoundingBox;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::VisionError;
use crate::models::{
    BackendKind, DetectOptions, Screenshot, VisionExecutionResult, VisionResult,
};
use crate::{check_threshold, VisionBackend};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.3;
const MAX_COMPLETION_TOKENS: u32 = 1024;

pub struct OpenAiBackend {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    threshold: RwLock<f64>,
    initialized: AtomicBool,
}

impl OpenAiBackend {
    pub fn new(api_url: Option<String>, api_key: Option<String>, model: Option<String>) -> Self {
        Self {
            api_url: api_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client: reqwest::Client::new(),
            threshold: RwLock::new(DEFAULT_CONFIDENCE_THRESHOLD),
            initialized: AtomicBool::new(false),
        }
    }

    fn instruction(options: &DetectOptions) -> String {
        let mut prompt = options
            .prompt
            .clone()
            .unwrap_or_else(|| "Read and return all visible text in this screenshot.".to_string());
        if let Some(language) = options.ocr_language.as_deref() {
            prompt.push_str(&format!(" Answer in language: {language}."));
        }
        prompt
    }

    fn request_body(&self, screenshot: &Screenshot, options: &DetectOptions) -> Value {
        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(&screenshot.data));
        json!({
            "model": self.model,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": Self::instruction(options) },
                    { "type": "image_url", "image_url": { "url": data_uri } },
                ],
            }],
        })
    }
}

#[async_trait]
impl VisionBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn initialize(&self) -> Result<(), VisionError> {
        if !self.is_available().await {
            return Err(VisionError::BackendNotAvailable(BackendKind::OpenAi));
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn detect_elements(
        &self,
        screenshot: &Screenshot,
        options: &DetectOptions,
    ) -> Result<Vec<VisionExecutionResult>, VisionError> {
        if !self.initialized.load(Ordering::Relaxed) {
            return Err(VisionError::NotInitialized(BackendKind::OpenAi));
        }
        if screenshot.data.is_empty() {
            return Ok(vec![VisionExecutionResult::failed(
                BackendKind::OpenAi,
                "empty screenshot payload",
                0,
            )]);
        }

        let started = Instant::now();
        let key = match self.api_key.as_deref() {
            Some(key) => key,
            None => {
                return Ok(vec![VisionExecutionResult::failed(
                    BackendKind::OpenAi,
                    "api key missing",
                    0,
                )])
            }
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(key)
            .json(&self.request_body(screenshot, options))
            .send()
            .await;

        let elapsed = started.elapsed().as_millis() as u64;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return Ok(vec![VisionExecutionResult::failed(
                    BackendKind::OpenAi,
                    format!("chat completion call failed: {err}"),
                    elapsed,
                )])
            }
        };

        if !response.status().is_success() {
            return Ok(vec![VisionExecutionResult::failed(
                BackendKind::OpenAi,
                format!("chat completion call failed: HTTP {}", response.status()),
                elapsed,
            )]);
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                return Ok(vec![VisionExecutionResult::failed(
                    BackendKind::OpenAi,
                    format!("chat completion response unreadable: {err}"),
                    elapsed,
                )])
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match extract_message_content(&payload) {
            Some(text) if !text.trim().is_empty() => {
                debug!(target: "openai-vision", chars = text.len(), "model answer received");
                Ok(vec![VisionExecutionResult::succeeded(
                    BackendKind::OpenAi,
                    vec![VisionResult {
                        bbox: BoundingBox::new(
                            0.0,
                            0.0,
                            screenshot.width as f64,
                            screenshot.height as f64,
                        ),
                        confidence: 1.0,
                        label: Some(text),
                        element_id: None,
                    }],
                    elapsed,
                )])
            }
            _ => Ok(vec![VisionExecutionResult::failed(
                BackendKind::OpenAi,
                "chat completion returned no content",
                elapsed,
            )]),
        }
    }

    fn confidence_threshold(&self) -> f64 {
        self.threshold
            .read()
            .map(|t| *t)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    fn set_confidence_threshold(&self, threshold: f64) -> Result<(), VisionError> {
        let threshold = check_threshold(threshold)?;
        if let Ok(mut guard) = self.threshold.write() {
            *guard = threshold;
        }
        Ok(())
    }
}

fn extract_message_content(payload: &Value) -> Option<String> {
    payload
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_without_api_key() {
        let backend = OpenAiBackend::new(None, None, None);
        assert!(!backend.is_available().await);
        assert!(matches!(
            backend.initialize().await,
            Err(VisionError::BackendNotAvailable(BackendKind::OpenAi))
        ));
    }

    #[tokio::test]
    async fn available_with_api_key() {
        let backend = OpenAiBackend::new(None, Some("sk-test".into()), None);
        assert!(backend.is_available().await);
        backend.initialize().await.unwrap();
    }

    #[test]
    fn request_body_embeds_image_and_prompt() {
        let backend = OpenAiBackend::new(None, Some("sk-test".into()), Some("gpt-4o".into()));
        let screenshot = Screenshot::new(vec![0u8; 16], 100, 50);
        let options = DetectOptions {
            prompt: Some("Extract the order total".into()),
            ocr_language: Some("en".into()),
            ..Default::default()
        };
        let body = backend.request_body(&screenshot, &options);
        assert_eq!(body["model"], "gpt-4o");
        let content = &body["messages"][0]["content"];
        assert!(content[0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Extract the order total"));
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn extracts_message_content() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Total: 42.50" } }]
        });
        assert_eq!(
            extract_message_content(&payload).as_deref(),
            Some("Total: 42.50")
        );
        assert!(extract_message_content(&json!({ "choices": [] })).is_none());
    }
}
