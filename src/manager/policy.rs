use std::cmp;
use std::time::Duration;

use crate::config::{RestartConfig, RestartPolicyKind};
use crate::exec::ExitResult;

/// Tracks restart attempts for one service and answers the two policy
/// questions: restart after this exit, and after how long.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    config: RestartConfig,
    restarts: u32,
    user_stopped: bool,
}

impl RestartTracker {
    pub fn new(config: RestartConfig) -> Self {
        Self {
            config,
            restarts: 0,
            user_stopped: false,
        }
    }

    /// Completed restarts since the last fresh start.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// The sticky flag consulted by `unless-stopped`: set when an operator
    /// stops the service, cleared on an explicit fresh start.
    pub fn mark_user_stopped(&mut self) {
        self.user_stopped = true;
    }

    /// Resets the attempt counter and the sticky flag for an explicit
    /// operator-initiated (re)start. Exits never reset the counter, no
    /// matter how long the service ran.
    pub fn reset(&mut self) {
        self.restarts = 0;
        self.user_stopped = false;
    }

    pub fn record_restart(&mut self) {
        self.restarts += 1;
    }

    pub fn should_restart(&self, exit: &ExitResult) -> bool {
        match self.config.policy {
            RestartPolicyKind::Never => false,
            RestartPolicyKind::Always => self.restarts < self.config.max_retries,
            RestartPolicyKind::OnFailure => {
                !exit.success() && self.restarts < self.config.max_retries
            }
            RestartPolicyKind::UnlessStopped => !self.user_stopped,
        }
    }

    /// Backoff before restart attempt N (the current restart count):
    /// `min(initial * 2^N, max_delay)` under a cap, constant `initial`
    /// without one.
    pub fn next_delay(&self) -> Duration {
        let initial = self.config.initial_delay;
        if self.config.max_delay.is_zero() {
            return initial;
        }
        let factor = 2u32.saturating_pow(self.restarts.min(31));
        cmp::min(initial.saturating_mul(factor), self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn exit(code: i32) -> ExitResult {
        ExitResult {
            code,
            signal: None,
            duration: Duration::from_secs(1),
        }
    }

    fn tracker(policy: RestartPolicyKind, max_retries: u32) -> RestartTracker {
        RestartTracker::new(RestartConfig {
            policy,
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::ZERO,
        })
    }

    #[test]
    fn never_never_restarts() {
        let t = tracker(RestartPolicyKind::Never, 10);
        assert!(!t.should_restart(&exit(0)));
        assert!(!t.should_restart(&exit(1)));
    }

    #[test]
    fn always_respects_max_retries() {
        let mut t = tracker(RestartPolicyKind::Always, 2);
        assert!(t.should_restart(&exit(0)));
        t.record_restart();
        assert!(t.should_restart(&exit(1)));
        t.record_restart();
        assert!(!t.should_restart(&exit(0)));
    }

    #[test]
    fn on_failure_ignores_clean_exits() {
        let t = tracker(RestartPolicyKind::OnFailure, 3);
        assert!(!t.should_restart(&exit(0)));
        assert!(t.should_restart(&exit(1)));
    }

    #[test]
    fn on_failure_counts_a_signal_death_as_failure() {
        let t = tracker(RestartPolicyKind::OnFailure, 3);
        let killed = ExitResult {
            code: 137,
            signal: Some(nix::sys::signal::Signal::SIGKILL),
            duration: Duration::from_secs(1),
        };
        assert!(t.should_restart(&killed));
    }

    #[test]
    fn on_failure_exhausts_after_max_retries() {
        let mut t = tracker(RestartPolicyKind::OnFailure, 3);
        for _ in 0..3 {
            assert!(t.should_restart(&exit(1)));
            t.record_restart();
        }
        assert!(!t.should_restart(&exit(1)));
    }

    #[test]
    fn unless_stopped_is_unbounded_until_stopped() {
        let mut t = tracker(RestartPolicyKind::UnlessStopped, 0);
        for _ in 0..100 {
            assert!(t.should_restart(&exit(1)));
            t.record_restart();
        }
        t.mark_user_stopped();
        assert!(!t.should_restart(&exit(1)));
    }

    #[test]
    fn reset_clears_counter_and_sticky_flag() {
        let mut t = tracker(RestartPolicyKind::OnFailure, 1);
        t.record_restart();
        t.mark_user_stopped();
        assert!(!t.should_restart(&exit(1)));
        t.reset();
        assert!(t.should_restart(&exit(1)));
        assert_eq!(t.restarts(), 0);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(6, 30)] // capped at max_delay
    fn capped_backoff_doubles_until_the_cap(#[case] restarts: u32, #[case] expected_secs: u64) {
        let mut t = RestartTracker::new(RestartConfig {
            policy: RestartPolicyKind::Always,
            max_retries: 100,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        });
        for _ in 0..restarts {
            t.record_restart();
        }
        assert_eq!(t.next_delay(), Duration::from_secs(expected_secs));
    }

    #[test]
    fn without_a_cap_the_delay_is_constant() {
        let mut t = tracker(RestartPolicyKind::Always, 100);
        assert_eq!(t.next_delay(), Duration::from_secs(1));
        for _ in 0..10 {
            t.record_restart();
        }
        assert_eq!(t.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut t = RestartTracker::new(RestartConfig {
            policy: RestartPolicyKind::UnlessStopped,
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        });
        for _ in 0..64 {
            t.record_restart();
        }
        assert_eq!(t.next_delay(), Duration::from_secs(300));
    }
}
