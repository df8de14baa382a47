//! `flowpilot validate <flow-file>`

use std::path::PathBuf;

use clap::Args;
use flow_exec::{load_flow, validate_flow, FlowError};

use crate::exit_codes;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML flow document
    pub flow_file: PathBuf,
}

pub fn cmd_validate(args: &ValidateArgs) -> i32 {
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
    if issues.is_empty() {
        println!(
            "Flow '{}' is valid ({} steps)",
            flow.name,
            flow.steps.len()
        );
        exit_codes::OK
    } else {
        for issue in &issues {
            eprintln!("  {issue}");
        }
        eprintln!("{} validation errors", issues.len());
        exit_codes::VALIDATION
    }
}
