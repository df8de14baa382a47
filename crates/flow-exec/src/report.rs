//! Run reporting seam.
//!
//! The executor streams one record per attempt, fallback invocation, and
//! outcome; the CLI wires in a CSV sink, tests collect records in memory.

use chrono::{DateTime, Utc};
use flowpilot_core_types::{RunId, UserId};
use serde::Serialize;

use crate::types::{Step, StepAction};

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub run_id: RunId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    /// Advisory step number; empty for nested steps without one.
    pub step_no: String,
    pub url: String,
    pub action: StepAction,
    pub target: String,
    pub result: String,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(
        run_id: &RunId,
        user_id: &UserId,
        step: &Step,
        url: &str,
        result: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            user_id: user_id.clone(),
            timestamp: Utc::now(),
            step_no: step.step_label(),
            url: url.to_string(),
            action: step.action,
            target: step.target.clone(),
            result: result.into(),
            error,
        }
    }
}

pub trait RunReporter: Send + Sync {
    fn record(&self, record: StepRecord);
}

/// Reporter that drops everything; used where no log sink is wanted.
pub struct NullReporter;

impl RunReporter for NullReporter {
    fn record(&self, _record: StepRecord) {}
}
