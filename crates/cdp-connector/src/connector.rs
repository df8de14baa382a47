//! Session-owning connector exposing the page verbs the executor uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flowpilot_core_types::BoundingBox;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::ConnectorError;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};
use crate::ConnectorConfig;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Screenshot capture options.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub clip: Option<BoundingBox>,
}

/// Layout viewport size in CSS pixels, used for coordinate projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageMetrics {
    pub width: f64,
    pub height: f64,
}

/// Capability surface the flow executor drives. `CdpConnector` is the real
/// implementation; tests substitute their own.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn ensure_connected(&self) -> Result<(), ConnectorError>;
    async fn navigate(&self, url: &str) -> Result<(), ConnectorError>;
    async fn click(&self, selector: &str) -> Result<(), ConnectorError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ConnectorError>;
    async fn select(&self, selector: &str, value: &str) -> Result<(), ConnectorError>;
    async fn press(&self, key: &str) -> Result<(), ConnectorError>;
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<(), ConnectorError>;
    async fn click_at(&self, x: i64, y: i64) -> Result<(), ConnectorError>;
    async fn type_at(&self, x: i64, y: i64, text: &str) -> Result<(), ConnectorError>;
    async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>, ConnectorError>;
    async fn page_metrics(&self) -> Result<PageMetrics, ConnectorError>;
    async fn current_url(&self) -> Result<String, ConnectorError>;
}

#[derive(Clone, Debug)]
struct PageSession {
    #[allow(dead_code)]
    target_id: String,
    session_id: String,
}

pub struct CdpConnector {
    cfg: ConnectorConfig,
    transport: Arc<dyn CdpTransport>,
    session: Mutex<Option<PageSession>>,
}

impl CdpConnector {
    pub fn new(cfg: ConnectorConfig) -> Self {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: ConnectorConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            cfg,
            transport,
            session: Mutex::new(None),
        }
    }

    /// Establish the transport and attach a fresh page session.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        self.transport
            .start()
            .await
            .map_err(|err| ConnectorError::ConnectFailed(err.to_string()))?;

        let created = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await
            .map_err(|err| ConnectorError::ConnectFailed(err.to_string()))?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConnectorError::ConnectFailed("createTarget missing targetId".to_string())
            })?
            .to_string();

        let attached = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await
            .map_err(|err| ConnectorError::ConnectFailed(err.to_string()))?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConnectorError::ConnectFailed("attachToTarget missing sessionId".to_string())
            })?
            .to_string();

        self.transport
            .send_command(
                CommandTarget::Session(session_id.clone()),
                "Page.enable",
                json!({}),
            )
            .await?;

        info!(target: "cdp-connector", %target_id, "browser session attached");
        *self.session.lock().await = Some(PageSession {
            target_id,
            session_id,
        });
        Ok(())
    }

    async fn send_session(&self, method: &str, params: Value) -> Result<Value, ConnectorError> {
        let session = self
            .session
            .lock()
            .await
            .clone()
            .ok_or(ConnectorError::SessionExpired)?;
        self.transport
            .send_command(CommandTarget::Session(session.session_id), method, params)
            .await
    }

    /// Evaluate a JS expression in the page and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value, ConnectorError> {
        let response = self
            .send_session(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("script exception");
            return Err(ConnectorError::Internal(format!(
                "evaluate failed: {text}"
            )));
        }

        Ok(response
            .get("result")
            .and_then(|result| result.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn wait_for_dom_ready(&self, deadline: Instant) -> Result<(), ConnectorError> {
        loop {
            if Instant::now() >= deadline {
                return Err(ConnectorError::Timeout(
                    "navigation wait for dom ready".to_string(),
                ));
            }

            let ready = self
                .evaluate("document.readyState")
                .await?
                .as_str()
                .map(|state| matches!(state, "interactive" | "complete"))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }

            sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn selector_literal(selector: &str) -> Result<String, ConnectorError> {
        serde_json::to_string(selector).map_err(|err| ConnectorError::Internal(err.to_string()))
    }

    async fn dispatch_mouse(&self, kind: &str, x: i64, y: i64) -> Result<(), ConnectorError> {
        self.send_session(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": 1,
            }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl BrowserDriver for CdpConnector {
    /// Reconnect when the session's liveness probe fails; expiry is detected
    /// by probing, not by a timer.
    async fn ensure_connected(&self) -> Result<(), ConnectorError> {
        let attached = self.session.lock().await.is_some();
        if !attached {
            return self.connect().await;
        }

        match self.evaluate("1 + 1").await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(target: "cdp-connector", %err, "liveness probe failed; reconnecting");
                *self.session.lock().await = None;
                self.connect().await
            }
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), ConnectorError> {
        let deadline = Instant::now() + Duration::from_millis(self.cfg.default_deadline_ms);
        let response = self
            .send_session("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(ConnectorError::CdpIo(format!(
                    "navigation failed: {error_text}"
                )));
            }
        }
        self.wait_for_dom_ready(deadline).await
    }

    async fn click(&self, selector: &str) -> Result<(), ConnectorError> {
        let literal = Self::selector_literal(selector)?;
        let expr = format!(
            "(() => {{ const el = document.querySelector({literal}); if (!el) return 'missing'; el.click(); return 'ok'; }})()"
        );
        match self.evaluate(&expr).await?.as_str() {
            Some("ok") => Ok(()),
            _ => Err(ConnectorError::TargetNotFound(selector.to_string())),
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ConnectorError> {
        let literal = Self::selector_literal(selector)?;
        let text_literal = Self::selector_literal(text)?;
        let expr = format!(
            "(() => {{ const el = document.querySelector({literal}); if (!el) return 'missing'; \
             el.focus(); el.value = {text_literal}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return 'ok'; }})()"
        );
        match self.evaluate(&expr).await?.as_str() {
            Some("ok") => Ok(()),
            _ => Err(ConnectorError::TargetNotFound(selector.to_string())),
        }
    }

    async fn select(&self, selector: &str, value: &str) -> Result<(), ConnectorError> {
        let literal = Self::selector_literal(selector)?;
        let value_literal = Self::selector_literal(value)?;
        let expr = format!(
            "(() => {{ const el = document.querySelector({literal}); if (!el) return 'missing'; \
             const options = Array.from(el.options || []); \
             const hit = options.find(o => o.value === {value_literal} || o.label === {value_literal} || o.text === {value_literal}); \
             if (!hit) return 'no-option'; \
             el.value = hit.value; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return 'ok'; }})()"
        );
        match self.evaluate(&expr).await?.as_str() {
            Some("ok") => Ok(()),
            Some("no-option") => Err(ConnectorError::OptionNotFound(format!(
                "{value} in {selector}"
            ))),
            _ => Err(ConnectorError::TargetNotFound(selector.to_string())),
        }
    }

    async fn press(&self, key: &str) -> Result<(), ConnectorError> {
        let (key_name, text, key_code) = key_definition(key);
        let mut down = json!({
            "type": "keyDown",
            "key": key_name,
            "windowsVirtualKeyCode": key_code,
            "nativeVirtualKeyCode": key_code,
        });
        if let Some(text) = text {
            down["text"] = Value::String(text);
        }
        self.send_session("Input.dispatchKeyEvent", down).await?;
        self.send_session(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key_name,
                "windowsVirtualKeyCode": key_code,
                "nativeVirtualKeyCode": key_code,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<(), ConnectorError> {
        let literal = Self::selector_literal(selector)?;
        let expr = format!("!!document.querySelector({literal})");
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if self.evaluate(&expr).await?.as_bool().unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConnectorError::Timeout(format!(
                    "selector '{selector}' not present after {timeout_ms}ms"
                )));
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn click_at(&self, x: i64, y: i64) -> Result<(), ConnectorError> {
        debug!(target: "cdp-connector", x, y, "dispatching coordinate click");
        self.dispatch_mouse("mousePressed", x, y).await?;
        self.dispatch_mouse("mouseReleased", x, y).await
    }

    async fn type_at(&self, x: i64, y: i64, text: &str) -> Result<(), ConnectorError> {
        self.click_at(x, y).await?;
        self.send_session("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>, ConnectorError> {
        let mut params = json!({
            "format": "png",
            "captureBeyondViewport": options.full_page,
        });
        if let Some(clip) = &options.clip {
            params["clip"] = json!({
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": 1.0,
            });
        }

        let response = self
            .send_session("Page.captureScreenshot", params)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::Internal("screenshot missing data".to_string()))?;
        STANDARD
            .decode(data)
            .map_err(|err| ConnectorError::Internal(format!("screenshot decode: {err}")))
    }

    async fn page_metrics(&self) -> Result<PageMetrics, ConnectorError> {
        let response = self
            .send_session("Page.getLayoutMetrics", json!({}))
            .await?;
        let viewport = response
            .get("cssLayoutViewport")
            .or_else(|| response.get("layoutViewport"))
            .ok_or_else(|| {
                ConnectorError::Internal("layout metrics missing viewport".to_string())
            })?;

        let width = viewport
            .get("clientWidth")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let height = viewport
            .get("clientHeight")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Ok(PageMetrics { width, height })
    }

    async fn current_url(&self) -> Result<String, ConnectorError> {
        Ok(self
            .evaluate("window.location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

/// Map a step key name to a CDP key event definition.
fn key_definition(key: &str) -> (String, Option<String>, i64) {
    match key {
        "Enter" => ("Enter".to_string(), Some("\r".to_string()), 13),
        "Tab" => ("Tab".to_string(), None, 9),
        "Escape" => ("Escape".to_string(), None, 27),
        "Backspace" => ("Backspace".to_string(), None, 8),
        "ArrowUp" => ("ArrowUp".to_string(), None, 38),
        "ArrowDown" => ("ArrowDown".to_string(), None, 40),
        "ArrowLeft" => ("ArrowLeft".to_string(), None, 37),
        "ArrowRight" => ("ArrowRight".to_string(), None, 39),
        other => {
            let code = other
                .chars()
                .next()
                .map(|c| c.to_ascii_uppercase() as i64)
                .unwrap_or(0);
            (other.to_string(), Some(other.to_string()), code)
        }
    }
}
