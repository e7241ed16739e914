use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{after, never, Receiver};
use crossbeam::select;
use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use super::policy::RestartTracker;
use super::{Command, State, StatusCell};
use crate::config::ServiceConfig;
use crate::event::broadcaster::EventBroadcaster;
use crate::event::channel::{pub_sub, CancellationMessage, EventConsumer};
use crate::event::{Event, EventKind};
use crate::exec::{ExitResult, Executor, Spec, StartedChild};
use crate::health::scheduler::{spawn_probe, ProbeReport, ProbeSettings};
use crate::health::{aggregate, build_checker, HealthStatus};
use crate::kernel::credentials;
use crate::util::worker::RunningWorker;

enum TimerPurpose {
    /// Backoff elapsed; relaunch.
    RestartDue,
    /// Graceful-stop window elapsed; escalate to SIGKILL.
    StopDeadline,
}

pub(super) fn run(
    config: ServiceConfig,
    executor: Arc<dyn Executor>,
    events: EventBroadcaster<Event>,
    status: Arc<StatusCell>,
    commands: EventConsumer<Command>,
    cancel: EventConsumer<CancellationMessage>,
) {
    let tracker = RestartTracker::new(config.restart.clone());
    ManagerLoop {
        config,
        executor,
        events,
        status,
        state: State::Stopped,
        tracker,
        child: None,
        probes: Vec::new(),
        probe_states: HashMap::new(),
        probe_rx: None,
        timer: None,
        aggregate: HealthStatus::Unknown,
        restart_after_stop: false,
        shutting_down: false,
    }
    .run(commands, cancel)
}

struct ManagerLoop {
    config: ServiceConfig,
    executor: Arc<dyn Executor>,
    events: EventBroadcaster<Event>,
    status: Arc<StatusCell>,
    state: State,
    tracker: RestartTracker,
    child: Option<StartedChild>,
    probes: Vec<RunningWorker>,
    probe_states: HashMap<String, HealthStatus>,
    /// Live only while probes are scheduled; None otherwise so the select
    /// loop parks on a never-channel instead of spinning on a disconnect.
    probe_rx: Option<EventConsumer<ProbeReport>>,
    timer: Option<(Receiver<Instant>, TimerPurpose)>,
    aggregate: HealthStatus,
    restart_after_stop: bool,
    shutting_down: bool,
}

impl ManagerLoop {
    fn run(
        mut self,
        commands: EventConsumer<Command>,
        cancel: EventConsumer<CancellationMessage>,
    ) {
        let never_exit = never::<ExitResult>();
        let never_cmd = never::<Command>();
        let never_cancel = never::<CancellationMessage>();
        let never_probe = never::<ProbeReport>();
        let never_timer = never::<Instant>();
        let mut commands_open = true;
        let mut cancel_armed = true;

        loop {
            let cmd_rx = if commands_open {
                commands.as_ref().clone()
            } else {
                never_cmd.clone()
            };
            let cancel_rx = if cancel_armed {
                cancel.as_ref().clone()
            } else {
                never_cancel.clone()
            };
            let wait_rx = self
                .child
                .as_ref()
                .map(|c| c.wait.as_ref().clone())
                .unwrap_or_else(|| never_exit.clone());
            let probe_rx = self
                .probe_rx
                .as_ref()
                .map(|c| c.as_ref().clone())
                .unwrap_or_else(|| never_probe.clone());
            let timer_rx = self
                .timer
                .as_ref()
                .map(|(rx, _)| rx.clone())
                .unwrap_or_else(|| never_timer.clone());

            select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(command) => self.handle_command(command),
                    Err(_) => {
                        // Handle dropped: treat like a shutdown request.
                        commands_open = false;
                        if self.begin_shutdown() {
                            break;
                        }
                    }
                },
                recv(cancel_rx) -> _ => {
                    // Message or disconnect, either way shut down; disarm so
                    // a disconnect cannot spin the loop.
                    cancel_armed = false;
                    if self.begin_shutdown() {
                        break;
                    }
                }
                recv(wait_rx) -> msg => {
                    if let Ok(exit) = msg {
                        if self.handle_exit(exit) {
                            break;
                        }
                    }
                }
                recv(probe_rx) -> msg => match msg {
                    Ok(report) => self.handle_probe(report),
                    Err(_) => self.probe_rx = None,
                },
                recv(timer_rx) -> _ => self.handle_timer(),
            }
        }

        self.stop_probes();
    }

    fn handle_command(&mut self, command: Command) {
        if self.shutting_down {
            return;
        }
        match command {
            Command::Start => {
                if matches!(self.state, State::Stopped | State::Failed) {
                    self.fresh_start();
                } else {
                    debug!(service = self.config.name, state = %self.state, "ignoring start");
                }
            }
            Command::Stop => match self.state {
                State::Running => {
                    self.tracker.mark_user_stopped();
                    self.enter_stopping();
                }
                State::Starting if self.child.is_none() => {
                    // A restart was pending; cancel it.
                    self.tracker.mark_user_stopped();
                    self.timer = None;
                    self.transition(State::Stopped);
                }
                _ => {
                    debug!(service = self.config.name, state = %self.state, "ignoring stop");
                }
            },
            Command::Restart => match self.state {
                State::Running => {
                    self.restart_after_stop = true;
                    self.enter_stopping();
                }
                State::Starting if self.child.is_none() => {
                    self.timer = None;
                    self.fresh_start();
                }
                State::Stopped | State::Failed => self.fresh_start(),
                _ => {}
            },
            Command::Reload(new_config) => self.handle_reload(new_config),
        }
    }

    /// Explicit operator-initiated launch: the restart budget starts over.
    fn fresh_start(&mut self) {
        self.tracker.reset();
        self.status.update(|s| {
            s.restarts = 0;
            s.last_error = None;
        });
        self.launch();
    }

    fn handle_reload(&mut self, new_config: ServiceConfig) {
        if new_config == self.config {
            if self.state == State::Running {
                self.forward_reload_signal();
            }
            return;
        }
        // Refuse a config whose credentials no longer resolve; the running
        // service keeps its current config.
        if let Err(err) = credentials::resolve(&new_config.user, &new_config.group) {
            self.emit_error(format!("reload rejected: {err}"));
            return;
        }
        info!(service = self.config.name, "new config accepted, applies at next launch");
        self.config = new_config;
    }

    fn forward_reload_signal(&mut self) {
        let Some(name) = &self.config.reload_signal else {
            return;
        };
        let Some(child) = &self.child else { return };
        match parse_signal(name) {
            Ok(sig) => {
                info!(service = self.config.name, signal = %sig, "forwarding reload signal");
                if let Err(err) = self.executor.signal(child.pid, sig) {
                    self.emit_error(format!("reload signal failed: {err}"));
                }
            }
            Err(()) => self.emit_error(format!("invalid reload signal '{name}'")),
        }
    }

    /// Returns true when the loop can end immediately (nothing left to stop).
    fn begin_shutdown(&mut self) -> bool {
        self.shutting_down = true;
        match self.state {
            State::Running => {
                self.enter_stopping();
                false
            }
            State::Stopping => false,
            _ => {
                self.timer = None;
                if self.state == State::Starting {
                    self.transition(State::Stopped);
                }
                true
            }
        }
    }

    fn enter_stopping(&mut self) {
        if let Some(child) = &self.child {
            if let Err(err) = self.executor.signal(child.pid, Signal::SIGTERM) {
                debug!(service = self.config.name, error = %err, "SIGTERM delivery failed");
            }
        }
        self.transition(State::Stopping);
        let timeout = self.config.stop_timeout.into();
        self.timer = Some((after(timeout), TimerPurpose::StopDeadline));
    }

    fn launch(&mut self) {
        self.transition(State::Starting);

        let spec = match self.build_spec() {
            Ok(spec) => spec,
            Err(message) => {
                self.fail(message);
                return;
            }
        };

        match self.executor.start(&spec) {
            Ok(child) => {
                info!(service = self.config.name, pid = child.pid, "service started");
                self.status.set_started(Some(Instant::now()));
                self.status.update(|s| s.pid = child.pid);
                self.emit(EventKind::Started { pid: child.pid });
                self.child = Some(child);
                self.transition(State::Running);
                self.start_probes();
            }
            Err(err) => self.fail(format!("launch failed: {err}")),
        }
    }

    fn build_spec(&self) -> Result<Spec, String> {
        let creds = credentials::resolve(&self.config.user, &self.config.group)
            .map_err(|err| format!("credential resolution failed: {err}"))?;
        let (stdout, stderr) = self.config.sink_configs();
        Ok(Spec {
            name: self.config.name.clone(),
            command: self.config.command.clone(),
            env: self.config.env.clone(),
            cwd: self.config.working_dir.clone(),
            credentials: creds,
            stdout,
            stderr,
        })
    }

    fn fail(&mut self, message: String) {
        warn!(service = self.config.name, error = message, "service failed");
        self.status
            .update(|s| s.last_error = Some(message.clone()));
        self.emit(EventKind::Error { message });
        self.transition(State::Failed);
    }

    /// Returns true when this exit ends the run loop (shutdown complete).
    fn handle_exit(&mut self, exit: ExitResult) -> bool {
        let Some(_child) = self.child.take() else {
            return false;
        };
        // Capture threads finish on their own at pipe EOF; their handles are
        // dropped here rather than joined so a grandchild holding the pipe
        // open cannot wedge the manager.

        self.stop_probes();
        self.set_aggregate(HealthStatus::Unknown);

        info!(
            service = self.config.name,
            code = exit.code,
            signal = exit.signal.map(|s| s.as_str()),
            "service exited"
        );
        self.status.set_started(None);
        self.status.update(|s| {
            s.pid = 0;
            s.last_exit_code = Some(exit.code);
        });
        self.emit(EventKind::Exited {
            result: exit.clone(),
        });

        if self.shutting_down {
            self.timer = None;
            self.transition(State::Stopped);
            return true;
        }

        match self.state {
            State::Stopping => {
                self.timer = None;
                self.transition(State::Stopped);
                if self.restart_after_stop {
                    self.restart_after_stop = false;
                    self.fresh_start();
                }
            }
            State::Running => {
                if self.tracker.should_restart(&exit) {
                    let delay = self.tracker.next_delay();
                    self.tracker.record_restart();
                    let attempt = self.tracker.restarts();
                    self.status.update(|s| s.restarts = attempt);
                    info!(
                        service = self.config.name,
                        attempt,
                        delay = ?delay,
                        "restart scheduled"
                    );
                    self.emit(EventKind::RestartScheduled { delay, attempt });
                    self.transition(State::Starting);
                    self.timer = Some((after(delay), TimerPurpose::RestartDue));
                } else if exit.success() {
                    self.transition(State::Stopped);
                } else {
                    self.status.update(|s| {
                        s.last_error = Some(format!("exited with code {}", exit.code));
                    });
                    self.transition(State::Failed);
                }
            }
            _ => {}
        }
        false
    }

    fn handle_timer(&mut self) {
        let Some((_, purpose)) = self.timer.take() else {
            return;
        };
        match purpose {
            TimerPurpose::RestartDue => {
                if self.state == State::Starting && self.child.is_none() {
                    self.launch();
                }
            }
            TimerPurpose::StopDeadline => {
                if let Some(child) = &self.child {
                    warn!(
                        service = self.config.name,
                        pid = child.pid,
                        "stop timeout elapsed, killing process group"
                    );
                    if let Err(err) = self.executor.signal(child.pid, Signal::SIGKILL) {
                        debug!(service = self.config.name, error = %err, "SIGKILL delivery failed");
                    }
                    // Remain in Stopping; the reaper will deliver the exit.
                }
            }
        }
    }

    fn start_probes(&mut self) {
        self.stop_probes();
        self.probe_states.clear();

        let (tx, rx) = pub_sub();
        let checks = self
            .config
            .health_checks
            .iter()
            .chain(&self.config.listeners);
        for (index, check) in checks.enumerate() {
            match build_checker(check) {
                Ok(checker) => {
                    self.probe_states
                        .insert(checker.name().to_string(), HealthStatus::Unknown);
                    let settings = ProbeSettings {
                        interval: check.interval.into(),
                        timeout: check.timeout.into(),
                        failure_threshold: check.failure_threshold,
                        success_threshold: check.success_threshold,
                    };
                    self.probes.push(spawn_probe(checker, settings, tx.clone()));
                }
                Err(err) => self.emit_error(format!("probe #{index} not scheduled: {err}")),
            }
        }
        self.probe_rx = (!self.probes.is_empty()).then_some(rx);
    }

    fn stop_probes(&mut self) {
        self.probe_rx = None;
        for probe in self.probes.drain(..) {
            // Fire-and-forget: a probe mid-check winds down on its own once
            // it sees the cancellation.
            probe.cancel();
        }
    }

    fn handle_probe(&mut self, report: ProbeReport) {
        if !self.probe_states.contains_key(&report.probe) {
            return;
        }
        self.probe_states.insert(report.probe, report.status);
        self.set_aggregate(aggregate(self.probe_states.values().copied()));
    }

    fn set_aggregate(&mut self, new: HealthStatus) {
        if new == self.aggregate {
            return;
        }
        info!(service = self.config.name, from = %self.aggregate, to = %new, "health changed");
        self.emit(EventKind::HealthChanged {
            from: self.aggregate,
            to: new,
        });
        self.aggregate = new;
        self.status.update(|s| s.health = new);
    }

    fn transition(&mut self, to: State) {
        if self.state == to {
            return;
        }
        debug!(service = self.config.name, from = %self.state, to = %to, "state changed");
        self.emit(EventKind::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
        self.status.update(|s| s.state = to);
    }

    fn emit(&self, kind: EventKind) {
        self.events.broadcast(Event::now(&self.config.name, kind));
    }

    fn emit_error(&self, message: String) {
        warn!(service = self.config.name, "{message}");
        self.emit(EventKind::Error { message });
    }
}

/// Accepts "SIGHUP", "HUP" (case-insensitive) and the like.
fn parse_signal(name: &str) -> Result<Signal, ()> {
    let upper = name.to_ascii_uppercase();
    Signal::from_str(&upper)
        .or_else(|_| Signal::from_str(&format!("SIG{upper}")))
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RestartConfig, RestartPolicyKind, StopTimeout};
    use crate::event::channel::pub_sub as channel_pub_sub;
    use crate::exec::{ExecError, MockExecutor, UnixExecutor};
    use crate::kernel::reaper::{ChildRegistry, ZombieReaper};
    use crate::manager::{Manager, ManagerError, ManagerStatus};
    use std::time::Duration;
    use serial_test::serial;

    #[test]
    fn reload_signal_names_parse_loosely() {
        assert_eq!(parse_signal("SIGHUP"), Ok(Signal::SIGHUP));
        assert_eq!(parse_signal("hup"), Ok(Signal::SIGHUP));
        assert_eq!(parse_signal("usr2"), Ok(Signal::SIGUSR2));
        assert!(parse_signal("NOTASIGNAL").is_err());
    }

    /// Test fixture with a real executor and a background reaper.
    struct Fixture {
        _reaper: ZombieReaper,
        // Keeps the reaper's notification channel connected for the fixture's
        // lifetime; the reaper's poll interval does the actual waking here.
        _sigchld_tx: crate::event::channel::EventPublisher<Signal>,
        executor: Arc<UnixExecutor>,
        events: EventBroadcaster<Event>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ChildRegistry::default());
            let mut reaper = ZombieReaper::new(registry.clone());
            let (sigchld_tx, sigchld_rx) = channel_pub_sub();
            reaper.start(sigchld_rx);
            Self {
                _reaper: reaper,
                _sigchld_tx: sigchld_tx,
                executor: Arc::new(UnixExecutor::new(registry)),
                events: EventBroadcaster::default(),
            }
        }

        fn spawn(&self, config: ServiceConfig) -> Manager {
            Manager::spawn(config, self.executor.clone(), self.events.clone())
        }
    }

    fn wait_for<F: Fn(&ManagerStatus) -> bool>(
        manager: &Manager,
        timeout: Duration,
        pred: F,
    ) -> ManagerStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = manager.status();
            if pred(&status) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "condition not reached, last status: {status:?}"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn service(name: &str, command: &[&str]) -> ServiceConfig {
        ServiceConfig::new(name, command.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    #[serial(children)]
    fn happy_path_walks_stopped_starting_running_stopped() {
        let fixture = Fixture::new();
        let events = fixture.events.subscribe();
        let manager = fixture.spawn(service("echo", &["echo", "hi"]));

        assert_eq!(manager.status().state, State::Stopped);
        manager.start().unwrap();

        let status = wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Stopped && s.last_exit_code.is_some()
        });
        assert_eq!(status.last_exit_code, Some(0));
        assert_eq!(status.restarts, 0);
        assert_eq!(status.pid, 0);

        let mut states = Vec::new();
        while let Some(event) = events.try_recv() {
            if let EventKind::StateChanged { to, .. } = event.kind {
                states.push(to);
            }
        }
        assert_eq!(states, vec![State::Starting, State::Running, State::Stopped]);
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    #[serial(children)]
    fn on_failure_policy_attempts_exactly_max_retries_then_fails() {
        let fixture = Fixture::new();
        let events = fixture.events.subscribe();
        let mut config = service("flaky", &["false"]);
        config.restart = RestartConfig {
            policy: RestartPolicyKind::OnFailure,
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::ZERO,
        };
        let manager = fixture.spawn(config);
        manager.start().unwrap();

        let status = wait_for(&manager, Duration::from_secs(10), |s| {
            s.state == State::Failed
        });
        assert_eq!(status.restarts, 3);
        assert_eq!(status.last_exit_code, Some(1));

        manager.shutdown(Duration::from_secs(2));

        let mut started = 0;
        let mut scheduled = Vec::new();
        while let Some(event) = events.try_recv() {
            match event.kind {
                EventKind::Started { .. } => started += 1,
                EventKind::RestartScheduled { attempt, .. } => scheduled.push(attempt),
                _ => {}
            }
        }
        // 1 original launch + 3 restarts.
        assert_eq!(started, 4);
        assert_eq!(scheduled, vec![1, 2, 3]);
    }

    #[test]
    #[serial(children)]
    fn clean_exit_under_on_failure_is_not_restarted() {
        let fixture = Fixture::new();
        let mut config = service("oneshot", &["true"]);
        config.restart = RestartConfig {
            policy: RestartPolicyKind::OnFailure,
            max_retries: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::ZERO,
        };
        let manager = fixture.spawn(config);
        manager.start().unwrap();

        let status = wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Stopped && s.last_exit_code.is_some()
        });
        assert_eq!(status.restarts, 0);
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    #[serial(children)]
    fn stop_escalates_to_sigkill_for_a_term_ignoring_child() {
        let fixture = Fixture::new();
        let events = fixture.events.subscribe();
        let mut config = service(
            "hang",
            &["sh", "-c", "trap '' TERM; while true; do sleep 1; done"],
        );
        config.stop_timeout = StopTimeout(Duration::from_millis(500));
        let manager = fixture.spawn(config);
        manager.start().unwrap();

        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Running
        });
        // Let the trap install before we ask for a stop.
        std::thread::sleep(Duration::from_millis(200));

        let begin = Instant::now();
        manager.stop().unwrap();
        let status = wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Stopped
        });
        assert!(begin.elapsed() >= Duration::from_millis(400));
        assert_eq!(status.pid, 0);

        let killed = events.try_recv_all_exits().into_iter().last().unwrap();
        assert_eq!(killed.signal, Some(Signal::SIGKILL));
        manager.shutdown(Duration::from_secs(2));
    }

    impl crate::event::broadcaster::EventSubscriber<Event> {
        fn try_recv_all_exits(&self) -> Vec<ExitResult> {
            let mut exits = Vec::new();
            while let Some(event) = self.try_recv() {
                if let EventKind::Exited { result } = event.kind {
                    exits.push(result);
                }
            }
            exits
        }
    }

    #[test]
    #[serial(children)]
    fn reload_with_identical_config_forwards_the_configured_signal() {
        let fixture = Fixture::new();
        let events = fixture.events.subscribe();
        let mut config = service("reloader", &["sleep", "60"]);
        // sleep's default SIGHUP disposition is to terminate, which makes the
        // forwarded signal observable as the exit reason.
        config.reload_signal = Some("hup".to_string());
        let manager = fixture.spawn(config.clone());
        manager.start().unwrap();
        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Running
        });

        manager.reload(config).unwrap();

        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state != State::Running
        });
        let hup = events.try_recv_all_exits().into_iter().last().unwrap();
        assert_eq!(hup.signal, Some(Signal::SIGHUP));
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    #[serial(children)]
    fn unless_stopped_restarts_until_user_stop() {
        let fixture = Fixture::new();
        let mut config = service("loopy", &["false"]);
        config.restart = RestartConfig {
            policy: RestartPolicyKind::UnlessStopped,
            max_retries: 0,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::ZERO,
        };
        let manager = fixture.spawn(config);
        manager.start().unwrap();

        let status = wait_for(&manager, Duration::from_secs(10), |s| s.restarts >= 3);
        assert!(status.restarts >= 3);

        // The stop may land while a restart is pending or while running;
        // both paths end in Stopped.
        let _ = manager.stop();
        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Stopped
        });
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn launch_failure_is_terminal() {
        let mut mock = MockExecutor::new();
        mock.expect_start()
            .return_once(|_| Err(ExecError::EmptyCommand));
        let events = EventBroadcaster::default();
        let manager = Manager::spawn(
            service("broken", &["whatever"]),
            Arc::new(mock),
            events.clone(),
        );
        manager.start().unwrap();

        let status = wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Failed
        });
        assert!(status.last_error.unwrap().contains("launch failed"));
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    #[serial(children)]
    fn start_precondition_rejects_a_running_service() {
        let fixture = Fixture::new();
        let manager = fixture.spawn(service("sleepy", &["sleep", "5"]));
        manager.start().unwrap();
        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Running
        });
        assert_eq!(
            manager.start(),
            Err(ManagerError::AlreadyRunning("sleepy".to_string()))
        );
        manager.shutdown(Duration::from_secs(3));
    }

    #[test]
    #[serial(children)]
    fn stop_precondition_rejects_a_stopped_service() {
        let fixture = Fixture::new();
        let manager = fixture.spawn(service("idle", &["true"]));
        assert_eq!(
            manager.stop(),
            Err(ManagerError::NotRunning("idle".to_string()))
        );
        manager.shutdown(Duration::from_secs(2));
    }

    #[test]
    #[serial(children)]
    fn restart_command_resets_the_restart_budget() {
        let fixture = Fixture::new();
        let manager = fixture.spawn(service("again", &["sleep", "5"]));
        manager.start().unwrap();
        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Running
        });
        let first_pid = manager.status().pid;

        manager.restart().unwrap();
        let status = wait_for(&manager, Duration::from_secs(10), |s| {
            s.state == State::Running && s.pid != first_pid && s.pid != 0
        });
        assert_eq!(status.restarts, 0);
        manager.shutdown(Duration::from_secs(3));
    }

    #[test]
    #[serial(children)]
    fn shutdown_while_backoff_is_pending_ends_promptly() {
        let fixture = Fixture::new();
        let mut config = service("patient", &["false"]);
        config.restart = RestartConfig {
            policy: RestartPolicyKind::Always,
            max_retries: 10,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::ZERO,
        };
        let manager = fixture.spawn(config);
        manager.start().unwrap();

        wait_for(&manager, Duration::from_secs(5), |s| {
            s.state == State::Starting && s.restarts == 1
        });
        let begin = Instant::now();
        manager.shutdown(Duration::from_secs(5));
        assert!(begin.elapsed() < Duration::from_secs(5));
    }
}
