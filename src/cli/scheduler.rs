//! `flowpilot scheduler start <flow-file> <cron-expr>` / `flowpilot scheduler stop`

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;

use flow_exec::{load_flow, validate_flow};
use flowpilot_core_types::RunId;
use flowpilot_scheduler::{signal_stop, FlowScheduler, LockFile, SchedulerError, TickFn};

use crate::cli::run::{execute_flow, RunMode};
use crate::config::AppConfig;
use crate::exit_codes;

#[derive(Subcommand, Clone, Debug)]
pub enum SchedulerCommands {
    /// Start a cron-triggered scheduler for one flow (runs until signalled)
    Start {
        /// Path to the YAML flow document
        flow_file: PathBuf,

        /// Standard 5-field cron expression, e.g. "*/10 * * * *"
        cron_expression: String,

        /// Run identifier override (defaults to a slug of the flow name)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Signal the running scheduler to stop
    Stop,
}

pub async fn cmd_scheduler(command: SchedulerCommands, config: &AppConfig) -> i32 {
    match command {
        SchedulerCommands::Start {
            flow_file,
            cron_expression,
            run_id,
        } => start(flow_file, cron_expression, run_id, config).await,
        SchedulerCommands::Stop => stop(config),
    }
}

async fn start(
    flow_file: PathBuf,
    cron_expression: String,
    run_id: Option<String>,
    config: &AppConfig,
) -> i32 {
    let flow = match load_flow(&flow_file) {
        Ok(flow) => flow,
        Err(err) => {
            eprintln!("  flow: {err}");
            eprintln!("1 validation errors");
            return exit_codes::VALIDATION;
        }
    };
    let issues = validate_flow(&flow);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("  {issue}");
        }
        eprintln!("{} validation errors", issues.len());
        return exit_codes::VALIDATION;
    }

    // Scheduler runs are keyed by a stable id so a second start with the
    // same identifier collides with the advisory lock.
    let run_id = run_id
        .map(RunId)
        .unwrap_or_else(|| RunId::from_name(&flow.name));

    let lock = LockFile {
        run_id: run_id.to_string(),
        user_id: config.user_id.clone(),
        pid: std::process::id(),
        start_time: Utc::now(),
        flow_file: flow_file.display().to_string(),
        cron_expression,
    };

    let scheduler = FlowScheduler::new(config.logs_dir.clone());

    let tick_flow = Arc::new(flow);
    let tick_config = Arc::new(config.clone());
    let tick_run_id = run_id.clone();
    let tick: TickFn = Arc::new(move || {
        let flow = tick_flow.clone();
        let config = tick_config.clone();
        let run_id = tick_run_id.clone();
        Box::pin(async move {
            // A fresh connector per tick; a failed tick is reported upward
            // and logged by the scheduler, never propagated.
            let code = execute_flow(&flow, RunMode::Scheduler, run_id, &config).await;
            if code != exit_codes::OK {
                anyhow::bail!("tick exited with code {code}");
            }
            Ok(())
        })
    });

    println!("Starting scheduler for run id '{run_id}' (stop with 'flowpilot scheduler stop')");
    match scheduler.run(lock, tick).await {
        Ok(()) => {
            println!("Scheduler stopped");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err}");
            exit_codes::GENERAL
        }
    }
}

fn stop(config: &AppConfig) -> i32 {
    match signal_stop(&config.logs_dir) {
        Ok(pid) => {
            println!("Sent stop signal to scheduler (pid {pid})");
            exit_codes::OK
        }
        Err(SchedulerError::NotRunning) => {
            println!("Scheduler not running");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err}");
            exit_codes::GENERAL
        }
    }
}
