//! Control-Plane Session Gateway
//!
//! OIDC session issuance and downstream JWT exchange for the developer portal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cp_session_gateway::{config::Config, server::Gateway, setup_tracing};

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "cp-session-gateway", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CP_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (text or json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load a .env file when present; CP_URL / CP_DOMAIN usually live there
    // in local development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting session gateway"
    );

    match Gateway::new(config).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway terminated with error");
            ExitCode::FAILURE
        }
    }
}
