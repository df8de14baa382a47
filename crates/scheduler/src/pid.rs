//! Scheduler pid file and the stop signal path.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::SchedulerError;

const PID_FILE_NAME: &str = "scheduler.pid";

pub fn pid_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(PID_FILE_NAME)
}

/// Record this process as the running scheduler.
pub fn write_pid_file(logs_dir: &Path) -> Result<PathBuf, SchedulerError> {
    std::fs::create_dir_all(logs_dir)?;
    let path = pid_path(logs_dir);
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(path)
}

pub fn read_pid(logs_dir: &Path) -> Option<i32> {
    let raw = std::fs::read_to_string(pid_path(logs_dir)).ok()?;
    raw.trim().parse().ok()
}

/// Best-effort removal; a failure is logged, not fatal.
pub fn remove_pid_file(logs_dir: &Path) {
    let path = pid_path(logs_dir);
    if let Err(err) = std::fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(target: "scheduler", path = %path.display(), %err, "failed to remove pid file");
        }
    }
}

/// Signal the recorded scheduler process to stop (SIGTERM). Returns the pid
/// that was signalled.
pub fn signal_stop(logs_dir: &Path) -> Result<i32, SchedulerError> {
    let pid = read_pid(logs_dir).ok_or(SchedulerError::NotRunning)?;

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| SchedulerError::Runtime(format!("failed to signal pid {pid}: {err}")))?;
        info!(target: "scheduler", pid, "sent stop signal");
        Ok(pid)
    }

    #[cfg(not(unix))]
    {
        Err(SchedulerError::Runtime(
            "stop signalling is not supported on this platform".to_string(),
        ))
    }
}
