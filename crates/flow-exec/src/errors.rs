//! Flow execution errors.
//!
//! Backend- and matcher-level failures are converted to recorded step
//! results inside the executor; only validation failures, unrecoverable
//! connection loss, and fallback misconfiguration cross this boundary.

use cdp_connector::ConnectorError;
use template_match::MatchError;
use thiserror::Error;
use vision_backends::VisionError;

use crate::validate::ValidationIssue;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow validation failed with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("browser connection failed: {0}")]
    Connection(ConnectorError),

    #[error("step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("action '{action}' does not support template/vision fallback")]
    FallbackUnsupported { action: String },

    #[error(transparent)]
    Template(#[from] MatchError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("failed to read flow file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse flow document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    pub fn validation_issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            Self::Validation(issues) => Some(issues),
            _ => None,
        }
    }
}
