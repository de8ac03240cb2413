//! Entry point for the `modhostd` supervisor.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::CommandFactory;
use clap::error::ErrorKind;
use modhost_config::{Config, ConfigError};

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(error)) => error.exit(),
        Err(error) => Config::command()
            .error(ErrorKind::ArgumentConflict, error)
            .exit(),
    };
    if let Err(error) = modhostd::telemetry::initialise(&config) {
        drop(writeln!(io::stderr(), "modhostd: {error}"));
        return ExitCode::FAILURE;
    }
    match modhostd::run_supervisor(config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
