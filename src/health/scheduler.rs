use std::time::Duration;

use tracing::{debug, trace};

use super::{Checker, HealthResult, HealthStatus};
use crate::event::channel::EventPublisher;
use crate::util::worker::{RunningWorker, Worker};

/// State flip announced by a probe loop. Reports are only published when the
/// thresholded state changes, not on every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub probe: String,
    pub status: HealthStatus,
    pub result: HealthResult,
}

/// Readiness-probe style scheduling parameters.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failures before flipping to Unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes before flipping to Healthy.
    pub success_threshold: u32,
}

/// Threshold counters shared by every probe loop.
struct Thresholds {
    state: HealthStatus,
    successes: u32,
    failures: u32,
    success_threshold: u32,
    failure_threshold: u32,
}

impl Thresholds {
    fn new(settings: &ProbeSettings) -> Self {
        Self {
            state: HealthStatus::Unknown,
            successes: 0,
            failures: 0,
            success_threshold: settings.success_threshold.max(1),
            failure_threshold: settings.failure_threshold.max(1),
        }
    }

    /// Feeds one result in; returns the new state when it flips.
    fn observe(&mut self, healthy: bool) -> Option<HealthStatus> {
        if healthy {
            self.successes += 1;
            self.failures = 0;
            if self.state != HealthStatus::Healthy && self.successes >= self.success_threshold {
                self.state = HealthStatus::Healthy;
                return Some(self.state);
            }
        } else {
            self.failures += 1;
            self.successes = 0;
            if self.state != HealthStatus::Unhealthy && self.failures >= self.failure_threshold {
                self.state = HealthStatus::Unhealthy;
                return Some(self.state);
            }
        }
        None
    }
}

/// Spawns the periodic loop for one probe. The first check runs immediately;
/// afterwards the loop ticks at `settings.interval` until cancelled.
pub fn spawn_probe(
    checker: Box<dyn Checker>,
    settings: ProbeSettings,
    reports: EventPublisher<ProbeReport>,
) -> RunningWorker {
    let thread_name = format!("probe {}", checker.name());
    Worker::new(thread_name, move |cancel| {
        let mut thresholds = Thresholds::new(&settings);
        loop {
            let result = checker.check(settings.timeout);
            trace!(
                probe = checker.name(),
                kind = checker.kind(),
                healthy = result.is_healthy(),
                "probe tick"
            );

            if let Some(status) = thresholds.observe(result.is_healthy()) {
                debug!(probe = checker.name(), status = %status, "probe state changed");
                let report = ProbeReport {
                    probe: checker.name().to_string(),
                    status,
                    result,
                };
                if reports.publish(report).is_err() {
                    // Consumer gone: the manager is shutting this launch down.
                    break;
                }
            }

            if cancel.is_cancelled(settings.interval) {
                break;
            }
        }
    })
    .start()
}
