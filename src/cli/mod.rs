//! Command-line surface: `validate`, `run`, and `scheduler start/stop`.

pub mod run;
pub mod scheduler;
pub mod validate;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "flowpilot",
    version,
    about = "Drive a browser through YAML-declared flows with vision fallback"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a flow file without running it
    Validate(validate::ValidateArgs),

    /// Run a flow once
    Run(run::RunArgs),

    /// Manage cron-scheduled flow runs
    Scheduler {
        #[command(subcommand)]
        command: scheduler::SchedulerCommands,
    },
}

/// Execute the selected command and return the process exit code.
pub async fn dispatch(cli: Cli, config: &AppConfig) -> i32 {
    match cli.command {
        Commands::Validate(args) => validate::cmd_validate(&args),
        Commands::Run(args) => run::cmd_run(args, config).await,
        Commands::Scheduler { command } => scheduler::cmd_scheduler(command, config).await,
    }
}
