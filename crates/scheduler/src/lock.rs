//! Advisory single-instance lock files.
//!
//! One JSON file per run id; its existence means "an instance with this run
//! id is active". The guard is cooperative only: processes writing the file
//! directly bypass it, and a crash leaves a stale file behind that must be
//! removed by hand. Both limitations are accepted semantics, not bugs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::SchedulerError;

/// Contents of a lock file. Field names match the on-disk JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    pub run_id: String,
    pub user_id: String,
    pub pid: u32,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "flowFile")]
    pub flow_file: String,
    #[serde(rename = "cronExpression")]
    pub cron_expression: String,
}

/// Path of the lock file for a run id inside the logs directory.
pub fn lock_path(logs_dir: &Path, run_id: &str) -> PathBuf {
    logs_dir.join(format!("flowpilot_{run_id}.lock"))
}

/// Holds the acquired lock; release it on clean shutdown.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Create the lock file, rejecting the start when one already exists
    /// for this run id.
    pub fn acquire(logs_dir: &Path, lock: &LockFile) -> Result<Self, SchedulerError> {
        std::fs::create_dir_all(logs_dir)?;
        let path = lock_path(logs_dir, &lock.run_id);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SchedulerError::AlreadyRunning {
                    run_id: lock.run_id.clone(),
                    path,
                });
            }
            Err(err) => return Err(err.into()),
        };

        file.write_all(serde_json::to_string_pretty(lock)?.as_bytes())?;
        info!(target: "scheduler", run_id = %lock.run_id, path = %path.display(), "lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal; a failure is logged, not fatal.
    pub fn release(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(target: "scheduler", path = %self.path.display(), "lock released"),
            Err(err) => {
                warn!(target: "scheduler", path = %self.path.display(), %err, "failed to remove lock file")
            }
        }
    }
}

/// Read back an existing lock file, e.g. for diagnostics.
pub fn read_lock(logs_dir: &Path, run_id: &str) -> Result<LockFile, SchedulerError> {
    let raw = std::fs::read_to_string(lock_path(logs_dir, run_id))?;
    Ok(serde_json::from_str(&raw)?)
}
