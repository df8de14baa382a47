//! Cron-triggered run loop.
//!
//! Each tick invokes the supplied closure (which builds a fresh connector
//! and executor); tick failures are caught and logged, never allowed to
//! crash the scheduler process. Stop is signal-driven: SIGINT/SIGTERM (or
//! the cancellation token) halts the trigger, then the lock and pid files
//! are removed best-effort.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SchedulerError;
use crate::lock::{LockFile, LockGuard};
use crate::pid::{remove_pid_file, write_pid_file};

pub type TickFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type TickFn = Arc<dyn Fn() -> TickFuture + Send + Sync>;

pub struct FlowScheduler {
    logs_dir: PathBuf,
    shutdown: CancellationToken,
}

impl FlowScheduler {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self {
            logs_dir,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the run loop; the only cancellation surface besides
    /// process signals.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Acquire the single-instance lock, start the cron trigger, and block
    /// until a stop signal arrives.
    pub async fn run(&self, lock: LockFile, tick: TickFn) -> Result<(), SchedulerError> {
        let guard = LockGuard::acquire(&self.logs_dir, &lock)?;
        write_pid_file(&self.logs_dir)?;

        let result = self.run_trigger(&lock, tick).await;

        // Stop sequence: trigger already halted, now drop the markers.
        guard.release();
        remove_pid_file(&self.logs_dir);
        result
    }

    async fn run_trigger(&self, lock: &LockFile, tick: TickFn) -> Result<(), SchedulerError> {
        let cron = normalize_cron(&lock.cron_expression);

        let mut scheduler = JobScheduler::new()
            .await
            .map_err(|err| SchedulerError::Runtime(format!("failed to create scheduler: {err}")))?;

        let run_id = lock.run_id.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let tick = tick.clone();
            let run_id = run_id.clone();
            Box::pin(async move {
                info!(target: "scheduler", %run_id, "cron tick");
                if let Err(err) = tick().await {
                    // Tick failures must never take the scheduler down.
                    error!(target: "scheduler", %run_id, %err, "tick execution failed");
                }
            })
        })
        .map_err(|err| SchedulerError::InvalidCron {
            expr: lock.cron_expression.clone(),
            reason: err.to_string(),
        })?;

        scheduler
            .add(job)
            .await
            .map_err(|err| SchedulerError::Runtime(format!("failed to add job: {err}")))?;
        scheduler
            .start()
            .await
            .map_err(|err| SchedulerError::Runtime(format!("failed to start scheduler: {err}")))?;

        info!(
            target: "scheduler",
            run_id = %lock.run_id,
            cron = %cron,
            "scheduler running"
        );

        self.wait_for_stop().await;

        if let Err(err) = scheduler.shutdown().await {
            warn!(target: "scheduler", %err, "cron trigger shutdown reported an error");
        }
        info!(target: "scheduler", run_id = %lock.run_id, "scheduler stopped");
        Ok(())
    }

    async fn wait_for_stop(&self) {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {}
                _ = async {
                    match sigterm.as_mut() {
                        Some(signal) => {
                            signal.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }
}

/// Accept standard 5-field cron by prepending a seconds column; expressions
/// that already carry seconds pass through unchanged.
pub fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}
