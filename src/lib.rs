//! FlowPilot CLI library surface.
//!
//! The binary in `main.rs` is a thin shell over these modules so the CLI
//! logic stays testable.

pub mod cli;
pub mod config;
pub mod logging;
pub mod run_log;

/// Process exit codes of the `flowpilot` binary.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const INVALID_MODE: i32 = 2;
    pub const VALIDATION: i32 = 3;
    pub const CONNECTION: i32 = 4;
}
