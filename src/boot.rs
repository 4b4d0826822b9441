use std::{env, process::ExitCode, str::FromStr as _};

use clap::Parser as _;
use tracing::{debug, info};

use crate::{
    cli::{Cli, Commands},
    commands::{serve, version},
    config::{Config, Environment},
    setup_tracing::setup_tracing,
};

const ENVIRONMENT_VARIABLE: &str = "APP_ENVIRONMENT";

pub async fn boot() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        version::print_version_info();
        return ExitCode::SUCCESS;
    }

    let environment = set_environment();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    setup_tracing(&config.log_level, config.log_file.as_deref());
    debug!("environment set to: {environment}");

    // Configuration validation is the only error allowed to stop the
    // service.
    if let Err(e) = config.validate(environment) {
        tracing::error!("configuration error: {e}");
        return ExitCode::FAILURE;
    }
    info!("configuration validated, starting up");

    match cli.command {
        Some(Commands::Serve) | None => serve::handle_serve_command(environment, config).await,
        Some(Commands::Version) => unreachable!("handled above"),
    }
    ExitCode::SUCCESS
}

#[must_use]
pub fn set_environment() -> Environment {
    env::var(ENVIRONMENT_VARIABLE)
        .ok()
        .and_then(|s| Environment::from_str(&s).ok())
        .unwrap_or_default()
}
