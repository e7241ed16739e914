use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/warden/warden.yaml";

/// Command line arguments of the daemon.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Process supervisor daemon")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    pub check: bool,
}
