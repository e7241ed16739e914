use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// An enum representing possible errors during the logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

/// The daemon's own log output. Child process output is handled by the
/// capture pipeline, not by this subscriber.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Level directive; `RUST_LOG` overrides it when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// strftime pattern for log line timestamps.
    #[serde(default = "default_timestamp")]
    pub timestamps: String,

    /// Whether to include the module path in each line.
    #[serde(default)]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            timestamps: default_timestamp(),
            target: false,
        }
    }
}

fn default_level() -> String {
    DEFAULT_LEVEL.to_string()
}

fn default_timestamp() -> String {
    DEFAULT_TIMESTAMP.to_string()
}

impl LoggingConfig {
    /// Attempts to install the global subscriber with this configuration.
    pub fn try_init(&self) -> Result<(), LoggingError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.clone()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(self.timestamps.clone()))
            .with_target(self.target)
            .try_init()
            .map_err(|err| LoggingError::TryInitError(err.to_string()))
    }
}
