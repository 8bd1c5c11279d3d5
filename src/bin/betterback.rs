use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use betterback::{init_logging, run};
use betterback::console::types::Cli;
use betterback::error::{AppRunError, ConfigError};

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging();
    info!(concat!("BetterBack ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("Another betterback instance is already connected to the device");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
