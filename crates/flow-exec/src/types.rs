//! Flow and step model.
//!
//! Flows are YAML documents; the model mirrors their flat step shape. A flow
//! is immutable once loaded and owned by the executor for the duration of
//! one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use template_match::TemplateSource;
use vision_backends::BackendKind;

/// A named, ordered automation script targeting one browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Base URL that relative navigation targets resolve against.
    #[serde(default)]
    pub url_prefix: String,

    /// Flow-level default for the vision fallback chain.
    #[serde(default)]
    pub vision_fallback: bool,

    #[serde(default)]
    pub vision_backend: BackendKind,

    #[serde(default)]
    pub vision_api_url: Option<String>,

    #[serde(default)]
    pub vision_ocr_language: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step of a flow. The `action` discriminant decides which of the
/// optional fields are meaningful; validation enforces that per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Advisory number used for logging only; execution order is list order.
    #[serde(default)]
    pub step_no: Option<u32>,

    pub action: StepAction,

    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub description: String,

    /// Bounds the primary action's wait; exceeding it is a primary failure.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Step-level override of the flow's vision fallback default.
    #[serde(default)]
    pub vision_fallback: Option<bool>,

    /// Run the whole attempt-then-fallback sequence this many times.
    #[serde(default = "default_repeat")]
    pub repeat: u32,

    /// Skip-and-continue on iteration failure instead of failing the step.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Text for `type`, option for `select`.
    #[serde(default)]
    pub value: Option<String>,

    /// Page coordinates for `click_at`.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,

    /// Template image for `click_template`: exactly one of path/data.
    #[serde(default)]
    pub template_path: Option<String>,

    #[serde(default)]
    pub template_data: Option<String>,

    #[serde(default = "default_template_threshold")]
    pub template_threshold: f64,

    /// Sub-sequence for `loop` steps (one nesting level).
    #[serde(default)]
    pub loop_steps: Vec<Step>,
}

fn default_repeat() -> u32 {
    1
}

fn default_template_threshold() -> f64 {
    0.8
}

impl Step {
    pub fn template_source(&self) -> Option<TemplateSource> {
        match (&self.template_path, &self.template_data) {
            (Some(path), _) if !path.is_empty() => Some(TemplateSource::Path(path.clone())),
            (_, Some(data)) if !data.is_empty() => Some(TemplateSource::Base64(data.clone())),
            _ => None,
        }
    }

    /// Label used in log rows: the advisory step number, or empty for
    /// nested steps without one.
    pub fn step_label(&self) -> String {
        self.step_no.map(|n| n.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Navigate,
    Click,
    ClickAt,
    ClickTemplate,
    Type,
    Wait,
    Select,
    Press,
    Loop,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::ClickAt => "click_at",
            Self::ClickTemplate => "click_template",
            Self::Type => "type",
            Self::Wait => "wait",
            Self::Select => "select",
            Self::Press => "press",
            Self::Loop => "loop",
        }
    }

    /// Template/vision execution supports only click-like and type steps.
    pub fn supports_vision_fallback(&self) -> bool {
        matches!(self, Self::Click | Self::Type | Self::ClickTemplate)
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i64,
    pub y: i64,
}

/// How a step ultimately resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPhase {
    Primary,
    TemplateFallback,
    VisionFallback,
}

/// Terminal record of one step iteration.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_no: Option<u32>,
    pub action: StepAction,
    pub target: String,
    pub phase: ResolutionPhase,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl StepOutcome {
    pub fn new(step: &Step) -> Self {
        let now = Utc::now();
        Self {
            step_no: step.step_no,
            action: step.action,
            target: step.target.clone(),
            phase: ResolutionPhase::Primary,
            success: false,
            error: None,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
        }
    }

    pub fn with_phase(mut self, phase: ResolutionPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_success(mut self) -> Self {
        self.success = true;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at).num_milliseconds() as u64;
        self
    }
}

/// Result of one whole flow run.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRunResult {
    pub flow_name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub step_results: Vec<StepOutcome>,
    pub error: Option<String>,
}

impl FlowRunResult {
    pub fn new(flow_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            flow_name: flow_name.into(),
            success: false,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            step_results: Vec::new(),
            error: None,
        }
    }

    pub fn with_success(mut self) -> Self {
        self.success = true;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_step(mut self, outcome: StepOutcome) -> Self {
        self.step_results.push(outcome);
        self
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at).num_milliseconds() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_apply() {
        let step: Step = serde_yaml::from_str(
            "action: click\ntarget: \"#go\"\ndescription: click go\nstep_no: 1\n",
        )
        .unwrap();
        assert_eq!(step.repeat, 1);
        assert!(!step.continue_on_error);
        assert!((step.template_threshold - 0.8).abs() < f64::EPSILON);
        assert!(step.template_source().is_none());
    }

    #[test]
    fn action_names_are_snake_case() {
        assert_eq!(StepAction::ClickTemplate.as_str(), "click_template");
        let action: StepAction = serde_yaml::from_str("click_at").unwrap();
        assert_eq!(action, StepAction::ClickAt);
    }

    #[test]
    fn template_path_wins_over_data() {
        let step: Step = serde_yaml::from_str(
            "action: click_template\ntarget: icon\ndescription: d\ntemplate_path: a.png\n",
        )
        .unwrap();
        assert!(matches!(
            step.template_source(),
            Some(TemplateSource::Path(path)) if path == "a.png"
        ));
    }

    #[test]
    fn fallback_support_is_click_and_type_only() {
        assert!(StepAction::Click.supports_vision_fallback());
        assert!(StepAction::Type.supports_vision_fallback());
        assert!(StepAction::ClickTemplate.supports_vision_fallback());
        assert!(!StepAction::Navigate.supports_vision_fallback());
        assert!(!StepAction::Select.supports_vision_fallback());
        assert!(!StepAction::Press.supports_vision_fallback());
    }
}
