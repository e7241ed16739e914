//! Declarative configuration: the YAML model, validation and the loader.

pub mod loader;
pub mod validate;

pub use loader::{ConfigError, ConfigReloader, FileLoader};
pub use validate::{validate, CheckError, ValidationError};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::capture::{RotationConfig, SinkConfig, TimestampFormat};
use crate::logging::LoggingConfig;

pub const DEFAULT_LOG_BASE: &str = "/var/log/warden";

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LoggingConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Config {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// One declared service. Immutable once validated; reload swaps whole
/// instances rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Argv; the first element is the executable path.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// User to drop privileges to; empty inherits the daemon's identity.
    #[serde(default)]
    pub user: String,

    /// Group to drop privileges to; empty defaults to the user's primary
    /// group.
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub stop_timeout: StopTimeout,

    #[serde(default)]
    pub health_checks: Vec<CheckConfig>,

    /// Listener probes share the check schema; they are scheduled through
    /// the same probe machinery.
    #[serde(default)]
    pub listeners: Vec<CheckConfig>,

    #[serde(default)]
    pub logging: Option<ServiceLogging>,

    /// When set, an unchanged-config reload forwards this signal to the
    /// child instead of cycling it (e.g. "SIGHUP").
    #[serde(default)]
    pub reload_signal: Option<String>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            env: HashMap::new(),
            user: String::new(),
            group: String::new(),
            restart: RestartConfig::default(),
            stop_timeout: StopTimeout::default(),
            health_checks: Vec::new(),
            listeners: Vec::new(),
            logging: None,
            reload_signal: None,
        }
    }

    /// Builds the per-stream sink configuration, filling in the default
    /// `/var/log/warden/<service>/{stdout,stderr}.log` paths when file
    /// logging is enabled without explicit paths.
    pub fn sink_configs(&self) -> (SinkConfig, SinkConfig) {
        let Some(logging) = &self.logging else {
            return (SinkConfig::Passthrough, SinkConfig::Passthrough);
        };
        let default_path = |stream: &str| {
            PathBuf::from(DEFAULT_LOG_BASE)
                .join(&self.name)
                .join(format!("{stream}.log"))
        };
        let sink = |explicit: &Option<PathBuf>, stream: &str| SinkConfig::File {
            path: explicit.clone().unwrap_or_else(|| default_path(stream)),
            timestamps: logging.timestamps.clone(),
            rotation: logging.rotation.clone(),
        };
        (
            sink(&logging.stdout, "stdout"),
            sink(&logging.stderr, "stderr"),
        )
    }
}

/// Per-service output capture settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ServiceLogging {
    #[serde(default)]
    pub stdout: Option<PathBuf>,

    #[serde(default)]
    pub stderr: Option<PathBuf>,

    #[serde(default)]
    pub timestamps: TimestampFormat,

    #[serde(default)]
    pub rotation: RotationConfig,
}

/// What to do when a child exits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub policy: RestartPolicyKind,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(
        default = "default_initial_delay",
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub initial_delay: Duration,

    /// Caps the exponential backoff; zero keeps the delay constant at
    /// `initial_delay`.
    #[serde(
        default,
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub max_delay: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicyKind::default(),
            max_retries: 0,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: Duration::ZERO,
        }
    }
}

fn default_initial_delay() -> Duration {
    DEFAULT_INITIAL_DELAY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyKind {
    Always,
    OnFailure,
    #[default]
    Never,
    UnlessStopped,
}

/// How long a stopping service gets between SIGTERM and SIGKILL.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StopTimeout(
    #[serde(deserialize_with = "duration_str::deserialize_duration")] pub Duration,
);

impl Default for StopTimeout {
    fn default() -> Self {
        Self(DEFAULT_STOP_TIMEOUT)
    }
}

impl From<StopTimeout> for Duration {
    fn from(value: StopTimeout) -> Self {
        value.0
    }
}

/// A health or listener probe declaration, discriminated by `type`.
///
/// The type is kept as a plain string so an unrecognized value surfaces as a
/// typed validation error instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    // http
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    // tcp / grpc
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,

    // command / exec
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub interval: CheckInterval,

    #[serde(default)]
    pub timeout: CheckTimeout,

    /// Consecutive failures before the probe flips to Unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes before the probe flips to Healthy.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            name: String::new(),
            endpoint: String::new(),
            method: default_method(),
            expected_status: default_expected_status(),
            host: String::new(),
            port: 0,
            command: String::new(),
            interval: CheckInterval::default(),
            timeout: CheckTimeout::default(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CheckInterval(
    #[serde(deserialize_with = "duration_str::deserialize_duration")] pub Duration,
);

impl Default for CheckInterval {
    fn default() -> Self {
        Self(DEFAULT_CHECK_INTERVAL)
    }
}

impl From<CheckInterval> for Duration {
    fn from(value: CheckInterval) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CheckTimeout(
    #[serde(deserialize_with = "duration_str::deserialize_duration")] pub Duration,
);

impl Default for CheckTimeout {
    fn default() -> Self {
        Self(DEFAULT_CHECK_TIMEOUT)
    }
}

impl From<CheckTimeout> for Duration {
    fn from(value: CheckTimeout) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_service_parses_with_defaults() {
        let yaml = r#"
services:
  - name: web
    command: ["/usr/bin/web", "--port", "8080"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let svc = config.service("web").unwrap();
        assert_eq!(svc.command[0], "/usr/bin/web");
        assert_eq!(svc.restart.policy, RestartPolicyKind::Never);
        assert_eq!(Duration::from(svc.stop_timeout), Duration::from_secs(10));
        assert!(svc.logging.is_none());
        let (out, err) = svc.sink_configs();
        assert!(out.is_passthrough());
        assert!(err.is_passthrough());
    }

    #[test]
    fn humane_durations_and_policies_parse() {
        let yaml = r#"
services:
  - name: worker
    command: ["/usr/bin/worker"]
    stop_timeout: 500ms
    restart:
      policy: on-failure
      max_retries: 3
      initial_delay: 2s
      max_delay: 1m
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let svc = &config.services[0];
        assert_eq!(Duration::from(svc.stop_timeout), Duration::from_millis(500));
        assert_eq!(svc.restart.policy, RestartPolicyKind::OnFailure);
        assert_eq!(svc.restart.max_retries, 3);
        assert_eq!(svc.restart.initial_delay, Duration::from_secs(2));
        assert_eq!(svc.restart.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn check_defaults_follow_readiness_probe_conventions() {
        let yaml = r#"
services:
  - name: api
    command: ["/usr/bin/api"]
    health_checks:
      - type: http
        endpoint: http://127.0.0.1:9000/healthz
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let check = &config.services[0].health_checks[0];
        assert_eq!(check.kind, "http");
        assert_eq!(check.method, "GET");
        assert_eq!(check.expected_status, 200);
        assert_eq!(check.failure_threshold, 3);
        assert_eq!(check.success_threshold, 1);
        assert_eq!(Duration::from(check.interval), Duration::from_secs(10));
        assert_eq!(Duration::from(check.timeout), Duration::from_secs(5));
    }

    #[test]
    fn file_logging_defaults_to_the_conventional_base_path() {
        let yaml = r#"
services:
  - name: db
    command: ["/usr/bin/db"]
    logging:
      timestamps: unix-ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let (out, err) = config.services[0].sink_configs();
        match (out, err) {
            (
                SinkConfig::File { path: out_path, timestamps, .. },
                SinkConfig::File { path: err_path, .. },
            ) => {
                assert_eq!(out_path, PathBuf::from("/var/log/warden/db/stdout.log"));
                assert_eq!(err_path, PathBuf::from("/var/log/warden/db/stderr.log"));
                assert_eq!(timestamps, TimestampFormat::UnixMillis);
            }
            other => panic!("expected file sinks, got {other:?}"),
        }
    }
}
