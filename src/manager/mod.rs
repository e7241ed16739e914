//! Per-service process manager: a small state machine driven by a command
//! channel, the executor's wait channel and the probe report channel.

pub mod policy;
mod worker;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::config::ServiceConfig;
use crate::event::broadcaster::EventBroadcaster;
use crate::event::channel::{pub_sub, EventPublisher};
use crate::event::Event;
use crate::exec::Executor;
use crate::health::HealthStatus;
use crate::util::worker::Worker;

/// Public lifecycle state of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerStatus {
    pub name: String,
    pub state: State,
    /// 0 while no child is running.
    pub pid: u32,
    /// Zero while no child is running.
    pub uptime: Duration,
    /// Restarts since the last explicit start.
    pub restarts: u32,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub health: HealthStatus,
}

impl ManagerStatus {
    fn new(name: String) -> Self {
        Self {
            name,
            state: State::Stopped,
            pid: 0,
            uptime: Duration::ZERO,
            restarts: 0,
            last_exit_code: None,
            last_error: None,
            health: HealthStatus::Unknown,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("service '{0}' is not running")]
    NotRunning(String),

    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("service '{0}' is shutting down")]
    ShuttingDown(String),
}

/// Requests funneled into the manager's run loop. All external mutation goes
/// through this channel; the run-loop thread is the single owner of state
/// transitions.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Restart,
    Reload(ServiceConfig),
}

pub(crate) struct StatusCell {
    inner: Mutex<StatusInner>,
}

struct StatusInner {
    status: ManagerStatus,
    started_at: Option<Instant>,
}

impl StatusCell {
    fn new(name: String) -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                status: ManagerStatus::new(name),
                started_at: None,
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> ManagerStatus {
        let inner = self.inner.lock().expect("status lock poisoned");
        let mut status = inner.status.clone();
        status.uptime = inner
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        status
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ManagerStatus)) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        f(&mut inner.status);
    }

    pub(crate) fn set_started(&self, at: Option<Instant>) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.started_at = at;
    }
}

/// Handle to one service's manager. Cheap operations enqueue commands; the
/// run loop applies them in order.
pub struct Manager {
    name: String,
    commands: EventPublisher<Command>,
    status: Arc<StatusCell>,
    worker: crate::util::worker::RunningWorker,
}

impl Manager {
    /// Spawns the run loop for `config`. The service starts in `Stopped`;
    /// call [`start`](Self::start) to launch it.
    pub fn spawn(
        config: ServiceConfig,
        executor: Arc<dyn Executor>,
        events: EventBroadcaster<Event>,
    ) -> Self {
        let name = config.name.clone();
        let status = Arc::new(StatusCell::new(name.clone()));
        let (command_tx, command_rx) = pub_sub();

        let loop_status = status.clone();
        let thread_name = format!("manager {name}");
        let worker = Worker::new(thread_name, move |cancel| {
            worker::run(config, executor, events, loop_status, command_rx, cancel);
        })
        .start();

        Self {
            name,
            commands: command_tx,
            status,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ManagerStatus {
        self.status.snapshot()
    }

    pub fn start(&self) -> Result<(), ManagerError> {
        match self.status().state {
            State::Stopped | State::Failed => self.send(Command::Start),
            _ => Err(ManagerError::AlreadyRunning(self.name.clone())),
        }
    }

    pub fn stop(&self) -> Result<(), ManagerError> {
        match self.status().state {
            State::Running | State::Starting => self.send(Command::Stop),
            _ => Err(ManagerError::NotRunning(self.name.clone())),
        }
    }

    pub fn restart(&self) -> Result<(), ManagerError> {
        self.send(Command::Restart)
    }

    /// Hands the manager a replacement config. An identical config forwards
    /// the configured reload signal instead; a config whose credentials no
    /// longer resolve is rejected and the old one stays in effect.
    pub fn reload(&self, config: ServiceConfig) -> Result<(), ManagerError> {
        self.send(Command::Reload(config))
    }

    /// Begins a graceful shutdown without waiting for it.
    pub fn begin_shutdown(&self) {
        self.worker.cancel();
    }

    /// Begins (if not already begun) and waits out a graceful shutdown.
    /// The deadline should cover the service's stop timeout plus a reaping
    /// grace margin.
    pub fn shutdown(self, deadline: Duration) {
        if let Err(err) = self.worker.stop_with_deadline(deadline) {
            warn!(service = self.name, error = %err, "manager did not shut down in time");
        }
    }

    fn send(&self, command: Command) -> Result<(), ManagerError> {
        self.commands
            .publish(command)
            .map_err(|_| ManagerError::ShuttingDown(self.name.clone()))
    }
}
