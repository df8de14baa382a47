//! Remote element-parsing backend.
//!
//! Speaks the Gradio-style asynchronous submit/poll protocol: POST the
//! screenshot, receive an event id, then poll a server-sent-event style
//! endpoint whose `data:` frames eventually carry a two-element result
//! array. The second element is either a pre-parsed element list or a
//! line-oriented string (`icon N: {python-dict}`) that needs normalizing
//! before structured decoding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flowpilot_core_types::BoundingBox;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::VisionError;
use crate::models::{
    BackendKind, DetectOptions, Screenshot, VisionExecutionResult, VisionResult,
};
use crate::{check_threshold, VisionBackend};

/// Detection confidence floor, independent of any template-match threshold.
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.3;
/// Bounded polling: 30 attempts at one-second spacing, so at most ~30s.
const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Parser request tuning forwarded verbatim to the service.
const BOX_THRESHOLD: f64 = 0.05;
const IOU_THRESHOLD: f64 = 0.1;
const IMAGE_SIZE: u32 = 640;
/// Normalized bboxes are mapped onto this assumed resolution. Whether the
/// actual capture size should be used instead is an open question recorded
/// in DESIGN.md.
pub const REFERENCE_WIDTH: f64 = 1920.0;
pub const REFERENCE_HEIGHT: f64 = 1080.0;

pub struct OmniParserBackend {
    base_url: String,
    client: reqwest::Client,
    threshold: RwLock<f64>,
    initialized: AtomicBool,
}

/// One element as emitted by the parser service. Bbox corners are
/// normalized 0..1 over the parsed image.
#[derive(Debug, Clone, Deserialize)]
struct ParsedElement {
    #[serde(rename = "type", default)]
    kind: String,
    bbox: [f64; 4],
    #[serde(default)]
    content: String,
    #[serde(default)]
    interactivity: bool,
    #[serde(default)]
    source: String,
    #[serde(default = "full_confidence")]
    confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl OmniParserBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            threshold: RwLock::new(DEFAULT_CONFIDENCE_THRESHOLD),
            initialized: AtomicBool::new(false),
        }
    }

    fn call_url(&self) -> String {
        format!("{}/gradio_api/call/process", self.base_url)
    }

    async fn submit(&self, screenshot: &Screenshot) -> Result<String, String> {
        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(&screenshot.data));
        let body = json!({
            "data": [
                { "url": data_uri },
                BOX_THRESHOLD,
                IOU_THRESHOLD,
                true,
                IMAGE_SIZE,
            ]
        });

        let response = self
            .client
            .post(self.call_url())
            .json(&body)
            .send()
            .await
            .map_err(|err| format!("omniparser call failed: {err}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "omniparser call failed: HTTP {}",
                response.status()
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| format!("omniparser call failed: invalid response body: {err}"))?;

        payload
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "omniparser call failed: response missing event_id".to_string())
    }

    /// Poll the event endpoint until a frame carries the result array.
    async fn poll(&self, event_id: &str) -> Result<Value, String> {
        let url = format!("{}/{}", self.call_url(), event_id);

        for attempt in 1..=POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    debug!(target: "omniparser", attempt, %err, "poll request failed");
                    continue;
                }
            };
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(target: "omniparser", attempt, %err, "poll body unreadable");
                    continue;
                }
            };

            if let Some(elements) = extract_result_payload(&body) {
                return Ok(elements);
            }
        }

        Err(format!(
            "omniparser poll window exhausted after {POLL_ATTEMPTS} attempts"
        ))
    }

    fn build_results(
        &self,
        elements: Vec<ParsedElement>,
        options: &DetectOptions,
    ) -> Result<Vec<VisionResult>, String> {
        if elements.is_empty() {
            return Err("omniparser returned no parseable elements".to_string());
        }

        let threshold = options.threshold.unwrap_or_else(|| self.confidence_threshold());
        let mut kept: Vec<ParsedElement> = elements
            .into_iter()
            .filter(|element| element.confidence >= threshold)
            .collect();

        if let Some(target) = options.target.as_deref().map(str::to_lowercase) {
            kept.retain(|element| {
                element.content.to_lowercase().contains(&target)
                    || element.source.to_lowercase().contains(&target)
            });
        }

        if kept.is_empty() {
            return Err(match options.target.as_deref() {
                Some(target) => format!("no omniparser elements matched target '{target}'"),
                None => format!("all omniparser elements fell below confidence {threshold}"),
            });
        }

        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(top_k) = options.top_k {
            kept.truncate(top_k);
        }

        Ok(kept
            .into_iter()
            .enumerate()
            .map(|(idx, element)| VisionResult {
                bbox: scale_bbox(&element.bbox),
                confidence: element.confidence,
                label: (!element.content.is_empty()).then(|| element.content.clone()),
                element_id: Some(format!(
                    "{}-{}-{}",
                    element.source,
                    element.kind,
                    idx
                )),
            })
            .collect())
    }
}

/// Scan SSE-style `data:` frames for the two-element result array and return
/// its second entry (the element payload).
fn extract_result_payload(body: &str) -> Option<Value> {
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "null" {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            debug!(target: "omniparser", "skipping unparsable data frame");
            continue;
        };
        if let Value::Array(items) = value {
            if items.len() >= 2 {
                return Some(items[1].clone());
            }
        }
    }
    None
}

/// Decode the element payload: a JSON list, or the `icon N: {...}` string
/// micro-format.
fn parse_elements(payload: &Value) -> Vec<ParsedElement> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(element) => Some(element),
                Err(err) => {
                    debug!(target: "omniparser", %err, "skipping malformed element");
                    None
                }
            })
            .collect(),
        Value::String(raw) => parse_icon_lines(raw),
        other => {
            warn!(target: "omniparser", kind = ?other, "unexpected element payload type");
            Vec::new()
        }
    }
}

/// Parse the line-oriented `icon N: {python-dict}` format. Python literals
/// are normalized to JSON before decoding; lines that still fail to parse
/// are logged and skipped rather than failing the call.
fn parse_icon_lines(raw: &str) -> Vec<ParsedElement> {
    raw.lines()
        .filter_map(|line| {
            let brace = line.find('{')?;
            let normalized = normalize_python_literals(&line[brace..]);
            match serde_json::from_str::<ParsedElement>(&normalized) {
                Ok(element) => Some(element),
                Err(err) => {
                    debug!(target: "omniparser", %err, line, "skipping unparsable icon line");
                    None
                }
            }
        })
        .collect()
}

/// Turn a python-dict-ish literal into JSON: single quotes become double
/// quotes and `None`/`True`/`False` their JSON equivalents.
fn normalize_python_literals(raw: &str) -> String {
    raw.replace('\'', "\"")
        .replace("None", "null")
        .replace("True", "true")
        .replace("False", "false")
}

/// Map a normalized [x0, y0, x1, y1] bbox onto the reference resolution.
fn scale_bbox(corners: &[f64; 4]) -> BoundingBox {
    BoundingBox {
        x: corners[0] * REFERENCE_WIDTH,
        y: corners[1] * REFERENCE_HEIGHT,
        width: (corners[2] - corners[0]) * REFERENCE_WIDTH,
        height: (corners[3] - corners[1]) * REFERENCE_HEIGHT,
    }
}

#[async_trait]
impl VisionBackend for OmniParserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OmniParser
    }

    async fn is_available(&self) -> bool {
        if self.base_url.is_empty() {
            return false;
        }
        match self.client.get(&self.base_url).send().await {
            Ok(response) => response.status().is_success() || response.status().is_redirection(),
            Err(err) => {
                debug!(target: "omniparser", %err, "availability probe failed");
                false
            }
        }
    }

    async fn initialize(&self) -> Result<(), VisionError> {
        if !self.is_available().await {
            return Err(VisionError::BackendNotAvailable(BackendKind::OmniParser));
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
            return Err(VisionError::NotInitialized(BackendKind::OmniParser));
        }
        if screenshot.data.is_empty() {
            return Ok(vec![VisionExecutionResult::failed(
                BackendKind::OmniParser,
                "empty screenshot payload",
                0,
            )]);
        }

        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let event_id = match self.submit(screenshot).await {
            Ok(event_id) => event_id,
            Err(error) => {
                return Ok(vec![VisionExecutionResult::failed(
                    BackendKind::OmniParser,
                    error,
                    elapsed(started),
                )])
            }
        };

        let payload = match self.poll(&event_id).await {
            Ok(payload) => payload,
            Err(error) => {
                return Ok(vec![VisionExecutionResult::failed(
                    BackendKind::OmniParser,
                    error,
                    elapsed(started),
                )])
            }
        };

        let elements = parse_elements(&payload);
        match self.build_results(elements, options) {
            Ok(results) => Ok(vec![VisionExecutionResult::succeeded(
                BackendKind::OmniParser,
                results,
                elapsed(started),
            )]),
            Err(error) => Ok(vec![VisionExecutionResult::failed(
                BackendKind::OmniParser,
                error,
                elapsed(started),
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
