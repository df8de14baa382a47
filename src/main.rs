use clap::Parser;
use flowpilot_cli::cli::{dispatch, Cli};
use flowpilot_cli::config::AppConfig;

#[tokio::main]
async fn main() {
    flowpilot_cli::logging::init();

    let cli = Cli::parse();
    // Configuration is built once here and threaded by parameter; nothing
    // reads process-global state after this point.
    let config = AppConfig::from_env();

    let code = dispatch(cli, &config).await;
    std::process::exit(code);
}
