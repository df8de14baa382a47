//! `flowpilot run <flow-file> --mode {manual|cli|scheduler}`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::warn;

use cdp_connector::CdpConnector;
use flow_exec::{load_flow, validate_flow, Flow, FlowError, FlowExecutor};
use flowpilot_core_types::{RunId, UserId};
use vision_backends::{create_backend, VisionBackend};

use crate::config::AppConfig;
use crate::exit_codes;
use crate::run_log::CsvRunReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Headful browser, for watching a flow by hand.
    Manual,
    /// One-shot headless run.
    Cli,
    /// One tick on behalf of the scheduler.
    Scheduler,
}

pub fn parse_mode(raw: &str) -> Option<RunMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "manual" => Some(RunMode::Manual),
        "cli" => Some(RunMode::Cli),
        "scheduler" => Some(RunMode::Scheduler),
        _ => None,
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the YAML flow document
    pub flow_file: PathBuf,

    /// Execution mode: manual, cli, or scheduler
    #[arg(long, default_value = "cli")]
    pub mode: String,

    /// Run identifier override (defaults to a fresh id)
    #[arg(long)]
    pub run_id: Option<String>,
}

pub async fn cmd_run(args: RunArgs, config: &AppConfig) -> i32 {
    let Some(mode) = parse_mode(&args.mode) else {
        eprintln!(
            "Invalid mode '{}'. Valid modes: manual, cli, scheduler",
            args.mode
        );
        return exit_codes::INVALID_MODE;
    };

    let flow = match load_flow(&args.flow_file) {
        Ok(flow) => flow,
        Err(FlowError::Yaml(err)) => {
            eprintln!("  flow: {err}");
            eprintln!("1 validation errors");
            return exit_codes::VALIDATION;
        }
        Err(err) => {
            eprintln!("{err}");
            return exit_codes::GENERAL;
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

    let run_id = args
        .run_id
        .map(RunId)
        .unwrap_or_default();
    execute_flow(&flow, mode, run_id, config).await
}

/// Connect, build the executor, and run one flow. Shared by `run` and the
/// scheduler's tick path.
pub async fn execute_flow(
    flow: &Flow,
    mode: RunMode,
    run_id: RunId,
    config: &AppConfig,
) -> i32 {
    let connector = Arc::new(CdpConnector::new(config.connector_config(mode)));
    if let Err(err) = connector.connect().await {
        eprintln!("Browser connection failed: {err}");
        return exit_codes::CONNECTION;
    }

    let vision = build_vision(flow, config).await;

    let reporter = match CsvRunReporter::create(&config.logs_dir, &run_id) {
        Ok(reporter) => Arc::new(reporter),
        Err(err) => {
            eprintln!("Failed to open run log: {err}");
            return exit_codes::GENERAL;
        }
    };

    let executor = FlowExecutor::new(
        connector,
        vision,
        reporter,
        run_id,
        UserId::new(config.user_id.clone()),
    );

    match executor.execute(flow).await {
        Ok(result) if result.success => {
            println!(
                "Flow '{}' completed ({} step results)",
                flow.name,
                result.step_results.len()
            );
            exit_codes::OK
        }
        Ok(result) => {
            eprintln!(
                "Flow '{}' failed: {}",
                flow.name,
                result.error.as_deref().unwrap_or("unknown step failure")
            );
            exit_codes::GENERAL
        }
        Err(FlowError::Connection(err)) => {
            eprintln!("Browser connection failed: {err}");
            exit_codes::CONNECTION
        }
        Err(FlowError::Validation(issues)) => {
            for issue in &issues {
                eprintln!("  {issue}");
            }
            eprintln!("{} validation errors", issues.len());
            exit_codes::VALIDATION
        }
        Err(err) => {
            eprintln!("{err}");
            exit_codes::GENERAL
        }
    }
}

/// Construct the flow's vision backend at executor-setup time. An
/// unavailable backend is carried anyway: its detection calls resolve to
/// recorded failures rather than aborting the run.
async fn build_vision(flow: &Flow, config: &AppConfig) -> Option<Arc<dyn VisionBackend>> {
    if !flow.vision_fallback {
        return None;
    }

    let backend = create_backend(
        flow.vision_backend,
        &config.backend_config(flow.vision_api_url.as_deref()),
    );
    if let Err(err) = backend.initialize().await {
        warn!(
            target: "flowpilot",
            backend = %flow.vision_backend,
            %err,
            "vision backend failed to initialize; fallback detections will fail"
        );
    }
    Some(backend)
}
