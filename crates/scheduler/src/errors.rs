//! Scheduler error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("an instance with run id '{run_id}' is already running (lock file {path})")]
    AlreadyRunning { run_id: String, path: PathBuf },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("scheduler runtime error: {0}")]
    Runtime(String),

    #[error("no scheduler pid file found")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
