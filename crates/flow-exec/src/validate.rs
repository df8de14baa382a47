//! Flow document validation.
//!
//! Produces a per-field issue list rather than failing on the first
//! problem, so the CLI can surface everything at once.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::{Flow, Step, StepAction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a loaded flow. Empty result means the flow is runnable.
pub fn validate_flow(flow: &Flow) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if flow.name.trim().is_empty() {
        issues.push(ValidationIssue::new("name", "is required"));
    }
    if flow.description.trim().is_empty() {
        issues.push(ValidationIssue::new("description", "is required"));
    }
    if flow.url_prefix.trim().is_empty() {
        issues.push(ValidationIssue::new("url_prefix", "is required"));
    }
    if flow.steps.is_empty() {
        issues.push(ValidationIssue::new("steps", "at least one step is required"));
    }

    let mut seen_step_nos = HashSet::new();
    for (index, step) in flow.steps.iter().enumerate() {
        let path = format!("steps[{index}]");

        match step.step_no {
            None => issues.push(ValidationIssue::new(
                format!("{path}.step_no"),
                "is required at the top level",
            )),
            Some(no) => {
                if !seen_step_nos.insert(no) {
                    issues.push(ValidationIssue::new(
                        format!("{path}.step_no"),
                        format!("duplicate step number {no}"),
                    ));
                }
            }
        }

        validate_step(step, &path, 0, &mut issues);
    }

    issues
}

fn validate_step(step: &Step, path: &str, depth: usize, issues: &mut Vec<ValidationIssue>) {
    if step.target.trim().is_empty() && step.action != StepAction::Loop {
        issues.push(ValidationIssue::new(format!("{path}.target"), "is required"));
    }
    if step.description.trim().is_empty() {
        issues.push(ValidationIssue::new(
            format!("{path}.description"),
            "is required",
        ));
    }
    if step.repeat < 1 {
        issues.push(ValidationIssue::new(
            format!("{path}.repeat"),
            "must be at least 1",
        ));
    }
    if !(0.0..=1.0).contains(&step.template_threshold) {
        issues.push(ValidationIssue::new(
            format!("{path}.template_threshold"),
            "must be within 0.0..=1.0",
        ));
    }

    match step.action {
        StepAction::ClickAt => {
            if step.coordinates.is_none() {
                issues.push(ValidationIssue::new(
                    format!("{path}.coordinates"),
                    "is required for click_at",
                ));
            }
        }
        StepAction::ClickTemplate => {
            let has_path = step
                .template_path
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false);
            let has_data = step
                .template_data
                .as_deref()
                .map(|d| !d.trim().is_empty())
                .unwrap_or(false);
            if has_path == has_data {
                issues.push(ValidationIssue::new(
                    format!("{path}.template_path"),
                    "exactly one of template_path/template_data is required",
                ));
            }
        }
        StepAction::Type | StepAction::Select => {
            if step
                .value
                .as_deref()
                .map(|v| v.is_empty())
                .unwrap_or(true)
            {
                issues.push(ValidationIssue::new(
                    format!("{path}.value"),
                    format!("is required for {}", step.action),
                ));
            }
        }
        StepAction::Loop => {
            if depth > 0 {
                issues.push(ValidationIssue::new(
                    format!("{path}.action"),
                    "nested loop steps are not supported",
                ));
            }
            if step.loop_steps.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{path}.loop_steps"),
                    "must contain at least one step",
                ));
            }
            for (index, inner) in step.loop_steps.iter().enumerate() {
                let inner_path = format!("{path}.loop_steps[{index}]");
                validate_step(inner, &inner_path, depth + 1, issues);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinates;

    fn minimal_step(no: u32, action: StepAction) -> Step {
        Step {
            step_no: Some(no),
            action,
            target: "#target".to_string(),
            description: "a step".to_string(),
            timeout_ms: None,
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

    fn minimal_flow() -> Flow {
        Flow {
            name: "test".to_string(),
            description: "a flow".to_string(),
            url_prefix: "https://example.com".to_string(),
            vision_fallback: false,
            vision_backend: Default::default(),
            vision_api_url: None,
            vision_ocr_language: None,
            steps: vec![minimal_step(1, StepAction::Navigate)],
        }
    }

    #[test]
    fn accepts_a_minimal_flow() {
        assert!(validate_flow(&minimal_flow()).is_empty());
    }

    #[test]
    fn missing_url_prefix_is_reported() {
        let mut flow = minimal_flow();
        flow.url_prefix = String::new();
        let issues = validate_flow(&flow);
        assert!(issues.iter().any(|i| i.path == "url_prefix"));
    }

    #[test]
    fn empty_steps_are_reported() {
        let mut flow = minimal_flow();
        flow.steps.clear();
        let issues = validate_flow(&flow);
        assert!(issues.iter().any(|i| i.path == "steps"));
    }

    #[test]
    fn top_level_steps_need_unique_numbers() {
        let mut flow = minimal_flow();
        flow.steps.push(minimal_step(1, StepAction::Click));
        let issues = validate_flow(&flow);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("duplicate step number")));

        flow.steps[1].step_no = None;
        let issues = validate_flow(&flow);
        assert!(issues
            .iter()
            .any(|i| i.path == "steps[1].step_no" && i.message.contains("required")));
    }

    #[test]
    fn click_template_requires_exactly_one_source() {
        let mut flow = minimal_flow();
        let mut step = minimal_step(2, StepAction::ClickTemplate);
        flow.steps.push(step.clone());
        let issues = validate_flow(&flow);
        assert!(issues.iter().any(|i| i.message.contains("exactly one")));

        step.template_path = Some("a.png".to_string());
        step.template_data = Some("aGVsbG8=".to_string());
        flow.steps[1] = step;
        let issues = validate_flow(&flow);
        assert!(issues.iter().any(|i| i.message.contains("exactly one")));
    }

    #[test]
    fn click_at_requires_coordinates() {
        let mut flow = minimal_flow();
        flow.steps.push(minimal_step(2, StepAction::ClickAt));
        let issues = validate_flow(&flow);
        assert!(issues
            .iter()
            .any(|i| i.path == "steps[1].coordinates"));

        flow.steps[1].coordinates = Some(Coordinates { x: 10, y: 20 });
        assert!(validate_flow(&flow).is_empty());
    }

    #[test]
    fn template_threshold_domain_is_checked() {
        let mut flow = minimal_flow();
        flow.steps[0].template_threshold = 1.5;
        let issues = validate_flow(&flow);
        assert!(issues
            .iter()
            .any(|i| i.path.ends_with("template_threshold")));
    }

    #[test]
    fn loops_cannot_nest() {
        let mut flow = minimal_flow();
        let mut outer = minimal_step(2, StepAction::Loop);
        outer.target = String::new();
        let mut inner = minimal_step(3, StepAction::Loop);
        inner.target = String::new();
        inner.loop_steps = vec![minimal_step(4, StepAction::Click)];
        outer.loop_steps = vec![inner];
        flow.steps.push(outer);
        let issues = validate_flow(&flow);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("nested loop steps")));
    }

    #[test]
    fn nested_steps_do_not_need_step_numbers() {
        let mut flow = minimal_flow();
        let mut outer = minimal_step(2, StepAction::Loop);
        outer.target = String::new();
        let mut inner = minimal_step(0, StepAction::Click);
        inner.step_no = None;
        outer.loop_steps = vec![inner];
        flow.steps.push(outer);
        assert!(validate_flow(&flow).is_empty());
    }

    #[test]
    fn type_requires_a_value() {
        let mut flow = minimal_flow();
        flow.steps.push(minimal_step(2, StepAction::Type));
        let issues = validate_flow(&flow);
        assert!(issues.iter().any(|i| i.path == "steps[1].value"));
    }
}
