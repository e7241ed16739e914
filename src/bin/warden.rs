//! Daemon entry point: parse arguments, load and validate the config, hand
//! control to the supervisor.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use warden::cli::Cli;
use warden::config::FileLoader;
use warden::supervisor::Supervisor;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {
            info!("warden exited cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            // The subscriber may not be installed yet (config load failures),
            // so the error goes to stderr as well.
            eprintln!("warden: {err}");
            error!("exiting with error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Separated from [`main`] so errors propagate with `?` and are rendered
/// once, in display form.
fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let loader = FileLoader::new(&cli.config);
    let config = loader.load()?;

    if cli.check {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    config.log.try_init()?;
    info!(config = %cli.config.display(), services = config.services.len(), "starting warden");

    Supervisor::new(config, loader).run()?;
    Ok(())
}
