//! FlowPilot scheduler.
//!
//! Wraps flow execution in a cron-triggered loop with an advisory,
//! filesystem-marker single-instance guard per run id, and a signal-driven
//! stop path that halts the trigger and cleans up the marker files.

pub mod errors;
pub mod lock;
pub mod pid;
pub mod runtime;

pub use errors::SchedulerError;
pub use lock::{lock_path, read_lock, LockFile, LockGuard};
pub use pid::{pid_path, read_pid, remove_pid_file, signal_stop, write_pid_file};
pub use runtime::{normalize_cron, FlowScheduler, TickFn, TickFuture};
