//! sluice CLI: delivery stream emulator.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use sluice::{CliArgs, Config, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            match Config::load(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load config: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => Config::default(),
    };
    if let Some(address) = args.address {
        config.address = address;
    }

    info!(
        region = %config.region,
        account_id = %config.account_id,
        kinesis = config.kinesis.is_some(),
        "Starting sluice"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sluice failed: {e}");
            ExitCode::FAILURE
        }
    }
}
