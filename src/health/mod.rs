//! Health and listener probes: the probe interface, the concrete checkers,
//! the factory and the threshold-driven scheduler.

pub mod command;
pub mod factory;
pub mod http;
pub mod scheduler;
pub mod tcp;

pub use factory::build_checker;
pub use scheduler::{spawn_probe, ProbeReport, ProbeSettings};

use std::time::Duration;

use thiserror::Error;

/// Probe or aggregate health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Some probes are healthy while others have not concluded.
    Degraded,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("expected status {expected}, got {got}")]
    StatusMismatch { expected: u16, got: u16 },

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe command is empty")]
    EmptyCommand,

    #[error("{0}")]
    Io(String),
}

/// Outcome of one probe invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub message: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl HealthResult {
    pub fn healthy(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            duration,
            error: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>, duration: Duration, error: ProbeError) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            duration,
            error: Some(error.to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A single health or listener probe.
pub trait Checker: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn check(&self, timeout: Duration) -> HealthResult;
}

impl std::fmt::Debug for dyn Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Combines per-probe states into the service-level health.
///
/// Any unhealthy probe dominates; a uniform verdict passes through; a mix of
/// healthy and not-yet-concluded probes is degraded.
pub fn aggregate<I>(states: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    let mut saw_any = false;
    let mut all_healthy = true;
    let mut all_unknown = true;
    for state in states {
        saw_any = true;
        match state {
            HealthStatus::Unhealthy | HealthStatus::Degraded => return HealthStatus::Unhealthy,
            HealthStatus::Healthy => all_unknown = false,
            HealthStatus::Unknown => all_healthy = false,
        }
    }
    match (saw_any, all_healthy, all_unknown) {
        (false, _, _) => HealthStatus::Unknown,
        (_, true, _) => HealthStatus::Healthy,
        (_, _, true) => HealthStatus::Unknown,
        _ => HealthStatus::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use HealthStatus::*;

    #[rstest]
    #[case(vec![], Unknown)]
    #[case(vec![Unknown, Unknown], Unknown)]
    #[case(vec![Healthy, Healthy], Healthy)]
    #[case(vec![Healthy, Unknown], Degraded)]
    #[case(vec![Healthy, Unhealthy], Unhealthy)]
    #[case(vec![Unknown, Unhealthy], Unhealthy)]
    #[case(vec![Healthy], Healthy)]
    #[case(vec![Unhealthy], Unhealthy)]
    fn aggregation_rules(#[case] states: Vec<HealthStatus>, #[case] expected: HealthStatus) {
        assert_eq!(aggregate(states), expected);
    }
}
