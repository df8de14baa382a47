//! Step state machine.
//!
//! Per step: Pending → Attempting(primary) → on failure, the fallback chain
//! (template match, then vision detection) → Terminal. Fallbacks run only
//! when vision fallback is effectively enabled and the action is click-like
//! or type; anything else reaching the fallback path is a configuration
//! error. `repeat` re-runs the whole sequence, `continue_on_error` turns an
//! iteration failure into skip-and-continue.

use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use cdp_connector::{BrowserDriver, ScreenshotOptions};
use flowpilot_core_types::{
    project_to_page, BoundingBox, CropOffset, PagePoint, RunId, UserId,
};
use template_match::{decode_image_bytes, TemplateMatcher, TemplateSource};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vision_backends::{omniparser, BackendKind, DetectOptions, Screenshot, VisionBackend};

use crate::errors::FlowError;
use crate::report::{RunReporter, StepRecord};
use crate::types::{
    Flow, FlowRunResult, ResolutionPhase, Step, StepAction, StepOutcome,
};
use crate::validate::validate_flow;

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WAIT_MS: u64 = 1_000;

/// Transient per-run state. Owned by exactly one executor invocation.
struct ExecutionContext {
    current_url: String,
}

/// Why the primary attempt did not succeed. A template miss is a normal
/// escalate-to-vision signal, not an error.
enum PrimaryFailure {
    Action(String),
    TemplateMiss(String),
}

impl PrimaryFailure {
    fn describe(&self) -> String {
        match self {
            Self::Action(reason) => reason.clone(),
            Self::TemplateMiss(reason) => reason.clone(),
        }
    }
}

struct StepDisposition {
    completed: bool,
    outcomes: Vec<StepOutcome>,
}

pub struct FlowExecutor {
    driver: Arc<dyn BrowserDriver>,
    vision: Option<Arc<dyn VisionBackend>>,
    reporter: Arc<dyn RunReporter>,
    run_id: RunId,
    user_id: UserId,
}

impl FlowExecutor {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        vision: Option<Arc<dyn VisionBackend>>,
        reporter: Arc<dyn RunReporter>,
        run_id: RunId,
        user_id: UserId,
    ) -> Self {
        Self {
            driver,
            vision,
            reporter,
            run_id,
            user_id,
        }
    }

    /// Execute every step of the flow strictly in list order. Steps run to a
    /// terminal state before the next one begins; a failed step aborts the
    /// flow unless it opted into `continue_on_error`.
    pub async fn execute(&self, flow: &Flow) -> Result<FlowRunResult, FlowError> {
        let issues = validate_flow(flow);
        if !issues.is_empty() {
            return Err(FlowError::Validation(issues));
        }

        info!(
            target: "flow-exec",
            flow = %flow.name,
            steps = flow.steps.len(),
            "executing flow"
        );
        self.driver
            .ensure_connected()
            .await
            .map_err(FlowError::Connection)?;

        let mut result = FlowRunResult::new(flow.name.clone());
        let mut ctx = ExecutionContext {
            current_url: flow.url_prefix.clone(),
        };

        for step in &flow.steps {
            let disposition = self.execute_step(flow, step, &mut ctx, 0).await?;
            result.step_results.extend(disposition.outcomes);
            if !disposition.completed {
                warn!(
                    target: "flow-exec",
                    step = %step.step_label(),
                    action = %step.action,
                    "step failed; aborting flow"
                );
                return Ok(result
                    .with_error(format!(
                        "step {} ({}) failed",
                        step.step_label(),
                        step.action
                    ))
                    .finish());
            }
        }

        info!(target: "flow-exec", flow = %flow.name, "flow completed");
        Ok(result.with_success().finish())
    }

    /// Run one step, honoring `repeat` and `continue_on_error`.
    #[async_recursion]
    async fn execute_step(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<StepDisposition, FlowError> {
        let mut outcomes = Vec::new();
        let repeat = step.repeat.max(1);

        for iteration in 1..=repeat {
            if repeat > 1 {
                debug!(
                    target: "flow-exec",
                    step = %step.step_label(),
                    iteration,
                    repeat,
                    "repeat iteration"
                );
            }

            let (success, mut iteration_outcomes) = if step.action == StepAction::Loop {
                self.run_loop_iteration(flow, step, ctx, depth).await?
            } else {
                let outcome = self.attempt_with_fallback(flow, step, ctx).await?;
                (outcome.success, vec![outcome])
            };

            outcomes.append(&mut iteration_outcomes);

            if !success {
                if step.continue_on_error {
                    debug!(
                        target: "flow-exec",
                        step = %step.step_label(),
                        "continue_on_error set; skipping iteration failure"
                    );
                    continue;
                }
                return Ok(StepDisposition {
                    completed: false,
                    outcomes,
                });
            }
        }

        Ok(StepDisposition {
            completed: true,
            outcomes,
        })
    }

    /// One iteration of a `loop` step: its sub-sequence in order, then a
    /// summary outcome for the loop itself.
    async fn run_loop_iteration(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<(bool, Vec<StepOutcome>), FlowError> {
        let summary = StepOutcome::new(step);
        let mut collected = Vec::new();
        let mut body_ok = true;

        for inner in &step.loop_steps {
            let disposition = self.execute_step(flow, inner, ctx, depth + 1).await?;
            collected.extend(disposition.outcomes);
            if !disposition.completed {
                body_ok = false;
                break;
            }
        }

        let summary = if body_ok {
            self.report(step, ctx, "success", None);
            summary.with_success().finish()
        } else {
            let error = "loop body failed".to_string();
            self.report(step, ctx, "failure", Some(error.clone()));
            summary.with_error(error).finish()
        };
        collected.push(summary);
        Ok((body_ok, collected))
    }

    /// Primary attempt, then the fallback chain.
    async fn attempt_with_fallback(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, FlowError> {
        let outcome = StepOutcome::new(step);

        let primary = match self.run_primary(flow, step, ctx).await {
            Ok(()) => {
                self.report(step, ctx, "success", None);
                return Ok(outcome.with_success().finish());
            }
            Err(primary) => primary,
        };

        let primary_desc = primary.describe();
        self.report(step, ctx, "primary_failed", Some(primary_desc.clone()));

        let fallback_enabled = step.vision_fallback.unwrap_or(flow.vision_fallback);
        if !fallback_enabled {
            return Ok(outcome.with_error(primary_desc).finish());
        }
        if !step.action.supports_vision_fallback() {
            // Misconfigured flow, not a step failure to swallow.
            return Err(FlowError::FallbackUnsupported {
                action: step.action.to_string(),
            });
        }

        // Template stage; skipped when template matching already was the
        // primary mechanism (click_template).
        if step.action != StepAction::ClickTemplate {
            if let Some(source) = step.template_source() {
                match self.template_locate(step, &source).await {
                    Ok(point) => {
                        self.report(step, ctx, "template_hit", None);
                        match self.act_at(step, point).await {
                            Ok(()) => {
                                self.report(step, ctx, "success", None);
                                return Ok(outcome
                                    .with_phase(ResolutionPhase::TemplateFallback)
                                    .with_success()
                                    .finish());
                            }
                            Err(err) => {
                                self.report(step, ctx, "template_act_failed", Some(err));
                            }
                        }
                    }
                    Err(miss) => {
                        self.report(step, ctx, "template_miss", Some(miss));
                    }
                }
            }
        }

        // Vision stage.
        match self.vision_locate(flow, step).await {
            Ok(point) => {
                self.report(step, ctx, "vision_hit", None);
                match self.act_at(step, point).await {
                    Ok(()) => {
                        self.report(step, ctx, "success", None);
                        Ok(outcome
                            .with_phase(ResolutionPhase::VisionFallback)
                            .with_success()
                            .finish())
                    }
                    Err(err) => {
                        self.report(step, ctx, "failure", Some(err.clone()));
                        Ok(outcome
                            .with_phase(ResolutionPhase::VisionFallback)
                            .with_error(err)
                            .finish())
                    }
                }
            }
            Err(reason) => {
                self.report(step, ctx, "vision_failed", Some(reason.clone()));
                Ok(outcome
                    .with_phase(ResolutionPhase::VisionFallback)
                    .with_error(reason)
                    .finish())
            }
        }
    }

    async fn run_primary(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &mut ExecutionContext,
    ) -> Result<(), PrimaryFailure> {
        let action_err = |err: cdp_connector::ConnectorError| PrimaryFailure::Action(err.to_string());
        let timeout_ms = step.timeout_ms.unwrap_or(DEFAULT_ACTION_TIMEOUT_MS);

        match step.action {
            StepAction::Navigate => {
                let url = resolve_url(&flow.url_prefix, &step.target);
                self.driver.navigate(&url).await.map_err(action_err)?;
                ctx.current_url = url;
                Ok(())
            }
            StepAction::Click => {
                self.driver
                    .wait_for_selector(&step.target, timeout_ms)
                    .await
                    .map_err(action_err)?;
                self.driver.click(&step.target).await.map_err(action_err)
            }
            StepAction::ClickAt => {
                let coords = step.coordinates.ok_or_else(|| {
                    PrimaryFailure::Action("click_at step missing coordinates".to_string())
                })?;
                self.driver
                    .click_at(coords.x, coords.y)
                    .await
                    .map_err(action_err)
            }
            StepAction::ClickTemplate => {
                let source = step.template_source().ok_or_else(|| {
                    PrimaryFailure::TemplateMiss("no template data on step".to_string())
                })?;
                let point = self
                    .template_locate(step, &source)
                    .await
                    .map_err(PrimaryFailure::TemplateMiss)?;
                self.driver
                    .click_at(point.x, point.y)
                    .await
                    .map_err(action_err)
            }
            StepAction::Type => {
                let text = step.value.clone().unwrap_or_default();
                self.driver
                    .wait_for_selector(&step.target, timeout_ms)
                    .await
                    .map_err(action_err)?;
                self.driver
                    .type_text(&step.target, &text)
                    .await
                    .map_err(action_err)
            }
            StepAction::Wait => {
                sleep(Duration::from_millis(wait_duration_ms(step))).await;
                Ok(())
            }
            StepAction::Select => {
                let value = step.value.clone().unwrap_or_default();
                self.driver
                    .wait_for_selector(&step.target, timeout_ms)
                    .await
                    .map_err(action_err)?;
                self.driver
                    .select(&step.target, &value)
                    .await
                    .map_err(action_err)
            }
            StepAction::Press => self.driver.press(&step.target).await.map_err(action_err),
            // Loop steps never reach the primary path.
            StepAction::Loop => Ok(()),
        }
    }

    /// Capture, match, and project a template hit onto page coordinates.
    async fn template_locate(
        &self,
        step: &Step,
        source: &TemplateSource,
    ) -> Result<PagePoint, String> {
        let template = source
            .load()
            .map_err(|err| format!("template load failed: {err}"))?;
        let png = self
            .driver
            .screenshot(&ScreenshotOptions::default())
            .await
            .map_err(|err| format!("screenshot failed: {err}"))?;
        let shot =
            decode_image_bytes(&png).map_err(|err| format!("screenshot decode failed: {err}"))?;

        let hit = TemplateMatcher::find(&shot, &template, step.template_threshold)
            .map_err(|err| format!("template match failed: {err}"))?
            .ok_or_else(|| {
                format!(
                    "template match below threshold {}",
                    step.template_threshold
                )
            })?;

        debug!(
            target: "flow-exec",
            x = hit.x,
            y = hit.y,
            confidence = hit.confidence,
            "template matched"
        );

        let bbox = BoundingBox::new(
            hit.x as f64 - hit.width as f64 / 2.0,
            hit.y as f64 - hit.height as f64 / 2.0,
            hit.width as f64,
            hit.height as f64,
        );
        let metrics = self
            .driver
            .page_metrics()
            .await
            .map_err(|err| format!("page metrics failed: {err}"))?;

        project_to_page(
            &bbox,
            shot.width as f64,
            shot.height as f64,
            metrics.width,
            metrics.height,
            CropOffset::default(),
        )
        .map_err(|err| err.to_string())
    }

    /// Ask the configured vision backend for the target element and project
    /// its box onto page coordinates.
    async fn vision_locate(&self, flow: &Flow, step: &Step) -> Result<PagePoint, String> {
        let backend = self
            .vision
            .as_ref()
            .ok_or_else(|| "no vision backend configured".to_string())?;

        let png = self
            .driver
            .screenshot(&ScreenshotOptions::default())
            .await
            .map_err(|err| format!("screenshot failed: {err}"))?;
        let shot =
            decode_image_bytes(&png).map_err(|err| format!("screenshot decode failed: {err}"))?;
        let screenshot = Screenshot::new(png, shot.width, shot.height);

        let options = DetectOptions {
            prompt: (!step.description.is_empty()).then(|| step.description.clone()),
            target: vision_target(&step.target),
            top_k: Some(5),
            ocr_language: flow.vision_ocr_language.clone(),
            ..Default::default()
        };

        let results = backend
            .detect_elements(&screenshot, &options)
            .await
            .map_err(|err| err.to_string())?;

        let best = results
            .iter()
            .filter(|result| result.success)
            .find_map(|result| result.best().cloned());
        let Some(best) = best else {
            let reason = results
                .iter()
                .filter_map(|result| result.error.clone())
                .next()
                .unwrap_or_else(|| "vision detection returned no elements".to_string());
            return Err(reason);
        };

        debug!(
            target: "flow-exec",
            backend = %backend.kind(),
            confidence = best.confidence,
            "vision element located"
        );

        // The remote parser reports boxes in its own reference resolution;
        // everything else uses capture-pixel space.
        let (source_width, source_height) = match backend.kind() {
            BackendKind::OmniParser => {
                (omniparser::REFERENCE_WIDTH, omniparser::REFERENCE_HEIGHT)
            }
            _ => (shot.width as f64, shot.height as f64),
        };

        let metrics = self
            .driver
            .page_metrics()
            .await
            .map_err(|err| format!("page metrics failed: {err}"))?;

        project_to_page(
            &best.bbox,
            source_width,
            source_height,
            metrics.width,
            metrics.height,
            CropOffset::default(),
        )
        .map_err(|err| err.to_string())
    }

    /// Execute the step's verb at projected coordinates.
    async fn act_at(&self, step: &Step, point: PagePoint) -> Result<(), String> {
        match step.action {
            StepAction::Type => {
                let text = step.value.clone().unwrap_or_default();
                self.driver
                    .type_at(point.x, point.y, &text)
                    .await
                    .map_err(|err| err.to_string())
            }
            _ => self
                .driver
                .click_at(point.x, point.y)
                .await
                .map_err(|err| err.to_string()),
        }
    }

    fn report(&self, step: &Step, ctx: &ExecutionContext, result: &str, error: Option<String>) {
        self.reporter.record(StepRecord::new(
            &self.run_id,
            &self.user_id,
            step,
            &ctx.current_url,
            result,
            error,
        ));
    }
}

fn resolve_url(prefix: &str, target: &str) -> String {
    let target = target.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    if target.is_empty() {
        return prefix.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        target.trim_start_matches('/')
    )
}

fn wait_duration_ms(step: &Step) -> u64 {
    step.timeout_ms
        .or_else(|| step.target.trim().parse().ok())
        .unwrap_or(DEFAULT_WAIT_MS)
}

/// Only pass the step target to the vision backend as a content filter when
/// it reads like human text rather than a selector.
fn vision_target(target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    let selector_like = target.starts_with('#')
        || target.starts_with('.')
        || target.starts_with('[')
        || target.starts_with("//")
        || target.contains('>');
    (!selector_like).then(|| target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReporter;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use cdp_connector::{ConnectorError, PageMetrics};
    use flowpilot_core_types::BoundingBox;
    use image::{ImageBuffer, Rgb};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use vision_backends::{VisionError, VisionExecutionResult, VisionResult};

    #[derive(Default)]
    struct MockDriver {
        missing_selectors: HashSet<String>,
        fail_navigate: bool,
        screenshot_png: Vec<u8>,
        metrics: Option<PageMetrics>,
        clicks: Mutex<Vec<String>>,
        clicked_at: Mutex<Vec<(i64, i64)>>,
        typed_at: Mutex<Vec<(i64, i64, String)>>,
        navigations: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrowserDriver for MockDriver {
        async fn ensure_connected(&self) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn navigate(&self, url: &str) -> Result<(), ConnectorError> {
            if self.fail_navigate {
                return Err(ConnectorError::CdpIo("navigation refused".into()));
            }
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), ConnectorError> {
            self.clicks.lock().unwrap().push(selector.to_string());
            Ok(())
        }

        async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn select(&self, _selector: &str, _value: &str) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn press(&self, _key: &str) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            timeout_ms: u64,
        ) -> Result<(), ConnectorError> {
            if self.missing_selectors.contains(selector) {
                return Err(ConnectorError::Timeout(format!(
                    "selector '{selector}' not present after {timeout_ms}ms"
                )));
            }
            Ok(())
        }

        async fn click_at(&self, x: i64, y: i64) -> Result<(), ConnectorError> {
            self.clicked_at.lock().unwrap().push((x, y));
            Ok(())
        }

        async fn type_at(&self, x: i64, y: i64, text: &str) -> Result<(), ConnectorError> {
            self.typed_at
                .lock()
                .unwrap()
                .push((x, y, text.to_string()));
            Ok(())
        }

        async fn screenshot(
            &self,
            _options: &ScreenshotOptions,
        ) -> Result<Vec<u8>, ConnectorError> {
            if self.screenshot_png.is_empty() {
                return Err(ConnectorError::Internal("no screenshot scripted".into()));
            }
            Ok(self.screenshot_png.clone())
        }

        async fn page_metrics(&self) -> Result<PageMetrics, ConnectorError> {
            self.metrics
                .ok_or_else(|| ConnectorError::Internal("no metrics scripted".into()))
        }

        async fn current_url(&self) -> Result<String, ConnectorError> {
            Ok("https://example.com".to_string())
        }
    }

    /// Backend that reports one fixed box in capture-pixel space.
    struct FixedVision {
        bbox: BoundingBox,
    }

    #[async_trait]
    impl VisionBackend for FixedVision {
        fn kind(&self) -> BackendKind {
            BackendKind::Som
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn initialize(&self) -> Result<(), VisionError> {
            Ok(())
        }

        async fn detect_elements(
            &self,
            _screenshot: &Screenshot,
            _options: &DetectOptions,
        ) -> Result<Vec<VisionExecutionResult>, VisionError> {
            Ok(vec![VisionExecutionResult::succeeded(
                BackendKind::Som,
                vec![VisionResult {
                    bbox: self.bbox,
                    confidence: 0.95,
                    label: Some("mock element".into()),
                    element_id: None,
                }],
                3,
            )])
        }

        fn confidence_threshold(&self) -> f64 {
            0.3
        }

        fn set_confidence_threshold(&self, _threshold: f64) -> Result<(), VisionError> {
            Ok(())
        }
    }

    fn executor(
        driver: Arc<MockDriver>,
        vision: Option<Arc<dyn VisionBackend>>,
    ) -> FlowExecutor {
        FlowExecutor::new(
            driver,
            vision,
            Arc::new(NullReporter),
            RunId::new(),
            UserId::new("tester"),
        )
    }

    fn step(no: u32, action: StepAction, target: &str) -> Step {
        Step {
            step_no: Some(no),
            action,
            target: target.to_string(),
            description: "test step".to_string(),
            timeout_ms: Some(10),
            vision_fallback: None,
            repeat: 1,
            continue_on_error: false,
            value: None,
            coordinates: None,
            template_path: None,
            template_data: None,
            template_threshold: 0.8,
            loop_steps: Vec::new(),
        }
    }

    fn flow(steps: Vec<Step>) -> Flow {
        Flow {
            name: "test-flow".to_string(),
            description: "executor test flow".to_string(),
            url_prefix: "https://example.com".to_string(),
            vision_fallback: false,
            vision_backend: Default::default(),
            vision_api_url: None,
            vision_ocr_language: None,
            steps,
        }
    }

    /// White canvas with a checkerboard patch pasted at (px, py), plus the
    /// patch alone, both PNG-encoded.
    fn screenshot_with_patch(px: u32, py: u32) -> (Vec<u8>, Vec<u8>) {
        let patch = ImageBuffer::from_fn(12, 12, |x, y| {
            if ((x / 3) + (y / 3)) % 2 == 0 {
                Rgb([240u8, 240, 240])
            } else {
                Rgb([15u8, 15, 15])
            }
        });
        let mut canvas = ImageBuffer::from_pixel(100, 60, Rgb([255u8, 255, 255]));
        for y in 0..12 {
            for x in 0..12 {
                canvas.put_pixel(px + x, py + y, *patch.get_pixel(x, y));
            }
        }

        let mut canvas_png = Vec::new();
        canvas
            .write_to(
                &mut std::io::Cursor::new(&mut canvas_png),
                image::ImageFormat::Png,
            )
            .unwrap();
        let mut patch_png = Vec::new();
        patch
            .write_to(
                &mut std::io::Cursor::new(&mut patch_png),
                image::ImageFormat::Png,
            )
            .unwrap();
        (canvas_png, patch_png)
    }

    #[tokio::test]
    async fn executes_navigate_and_wait_steps() {
        let driver = Arc::new(MockDriver::default());
        let executor = executor(driver.clone(), None);

        let mut wait = step(2, StepAction::Wait, "5");
        wait.timeout_ms = Some(5);
        let result = executor
            .execute(&flow(vec![step(1, StepAction::Navigate, "/login"), wait]))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(
            driver.navigations.lock().unwrap().as_slice(),
            ["https://example.com/login"]
        );
    }

    #[tokio::test]
    async fn primary_failure_without_fallback_aborts_flow() {
        let mut driver = MockDriver::default();
        driver.missing_selectors.insert("#gone".to_string());
        let executor = executor(Arc::new(driver), None);

        let result = executor
            .execute(&flow(vec![
                step(1, StepAction::Click, "#gone"),
                step(2, StepAction::Wait, "5"),
            ]))
            .await
            .unwrap();

        assert!(!result.success);
        // Only the failed step ran.
        assert_eq!(result.step_results.len(), 1);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn continue_on_error_skips_iteration_failures() {
        let mut driver = MockDriver::default();
        driver.missing_selectors.insert("#flaky".to_string());
        let executor = executor(Arc::new(driver), None);

        let mut flaky = step(1, StepAction::Click, "#flaky");
        flaky.continue_on_error = true;
        flaky.repeat = 3;
        let mut wait = step(2, StepAction::Wait, "5");
        wait.timeout_ms = Some(5);

        let result = executor.execute(&flow(vec![flaky, wait])).await.unwrap();

        assert!(result.success);
        // Three failed iterations plus the wait step.
        assert_eq!(result.step_results.len(), 4);
        assert_eq!(
            result.step_results.iter().filter(|o| !o.success).count(),
            3
        );
    }

    #[tokio::test]
    async fn template_fallback_clicks_projected_point() {
        let (canvas_png, patch_png) = screenshot_with_patch(40, 20);
        let mut driver = MockDriver::default();
        driver.missing_selectors.insert("#btn".to_string());
        driver.screenshot_png = canvas_png;
        driver.metrics = Some(PageMetrics {
            width: 100.0,
            height: 60.0,
        });
        let driver = Arc::new(driver);
        let executor = executor(driver.clone(), None);

        let mut clicky = step(1, StepAction::Click, "#btn");
        clicky.vision_fallback = Some(true);
        clicky.template_data = Some(STANDARD.encode(&patch_png));

        let result = executor.execute(&flow(vec![clicky])).await.unwrap();

        assert!(result.success);
        assert_eq!(
            result.step_results[0].phase,
            ResolutionPhase::TemplateFallback
        );
        // Patch center at 1:1 scale.
        assert_eq!(driver.clicked_at.lock().unwrap().as_slice(), [(46, 26)]);
    }

    #[tokio::test]
    async fn vision_fallback_projects_with_page_scale() {
        let (canvas_png, _) = screenshot_with_patch(40, 20);
        let mut driver = MockDriver::default();
        driver.missing_selectors.insert("#btn".to_string());
        driver.screenshot_png = canvas_png;
        // Page is half the capture size: 2x device pixel ratio.
        driver.metrics = Some(PageMetrics {
            width: 50.0,
            height: 30.0,
        });
        let driver = Arc::new(driver);
        let vision: Arc<dyn VisionBackend> = Arc::new(FixedVision {
            bbox: BoundingBox::new(60.0, 40.0, 20.0, 10.0),
        });
        let executor = executor(driver.clone(), Some(vision));

        let mut clicky = step(1, StepAction::Click, "#btn");
        clicky.vision_fallback = Some(true);

        let result = executor.execute(&flow(vec![clicky])).await.unwrap();

        assert!(result.success);
        assert_eq!(
            result.step_results[0].phase,
            ResolutionPhase::VisionFallback
        );
        // bbox center (70, 45) scaled by 0.5.
        assert_eq!(driver.clicked_at.lock().unwrap().as_slice(), [(35, 23)]);
    }

    #[tokio::test]
    async fn fallback_on_unsupported_action_is_a_config_error() {
        let mut driver = MockDriver::default();
        driver.fail_navigate = true;
        let executor = executor(Arc::new(driver), None);

        let mut nav = step(1, StepAction::Navigate, "/broken");
        nav.vision_fallback = Some(true);

        let err = executor.execute(&flow(vec![nav])).await.unwrap_err();
        assert!(matches!(err, FlowError::FallbackUnsupported { .. }));
    }

    #[tokio::test]
    async fn loop_steps_execute_their_body() {
        let driver = Arc::new(MockDriver::default());
        let executor = executor(driver.clone(), None);

        let mut inner = step(0, StepAction::Click, "#item");
        inner.step_no = None;
        let mut looping = step(1, StepAction::Loop, "");
        looping.repeat = 2;
        looping.loop_steps = vec![inner];

        let result = executor.execute(&flow(vec![looping])).await.unwrap();

        assert!(result.success);
        assert_eq!(driver.clicks.lock().unwrap().len(), 2);
        // Two inner outcomes and two loop summaries.
        assert_eq!(result.step_results.len(), 4);
    }

    #[tokio::test]
    async fn invalid_flow_is_rejected_before_connecting() {
        let executor = executor(Arc::new(MockDriver::default()), None);
        let mut bad = flow(vec![step(1, StepAction::Navigate, "/x")]);
        bad.url_prefix = String::new();

        let err = executor.execute(&bad).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn resolve_url_joins_relative_targets() {
        assert_eq!(
            resolve_url("https://example.com/", "/login"),
            "https://example.com/login"
        );
        assert_eq!(
            resolve_url("https://example.com", "https://other.test/x"),
            "https://other.test/x"
        );
        assert_eq!(resolve_url("https://example.com", ""), "https://example.com");
    }

    #[test]
    fn vision_target_rejects_selectors() {
        assert_eq!(vision_target("Login button"), Some("Login button".into()));
        assert_eq!(vision_target("#login"), None);
        assert_eq!(vision_target(".btn-primary"), None);
        assert_eq!(vision_target("div > span"), None);
        assert_eq!(vision_target("  "), None);
    }
}
