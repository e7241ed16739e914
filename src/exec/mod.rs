//! Turning a launch [`Spec`] into a running, observed child process.

pub mod unix;

pub use unix::UnixExecutor;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::capture::SinkConfig;
use crate::event::channel::EventConsumer;
use crate::kernel::credentials::Credentials;
use crate::kernel::reaper::LaunchId;
use crate::kernel::KernelError;

/// Outcome of one child process run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitResult {
    /// Exit code; when the child died to a signal this is `128 + signo`.
    pub code: i32,
    /// The terminating signal, if there was one.
    pub signal: Option<Signal>,
    /// Wall-clock time between launch and reap.
    pub duration: Duration,
}

impl ExitResult {
    pub fn success(&self) -> bool {
        self.signal.is_none() && self.code == 0
    }
}

/// Everything needed to launch one child, derived from the service config at
/// each launch (credentials are re-resolved every time).
#[derive(Debug, Clone, Default)]
pub struct Spec {
    /// Service name, used for thread names and log fields only.
    pub name: String,
    /// Argv; the first element is the executable path.
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub credentials: Credentials,
    pub stdout: SinkConfig,
    pub stderr: SinkConfig,
}

/// Handle to a launched child. The exit arrives exactly once on `wait`,
/// delivered by the reaper.
#[derive(Debug)]
pub struct StartedChild {
    pub launch_id: LaunchId,
    pub pid: u32,
    pub wait: EventConsumer<ExitResult>,
    /// Capture pump threads; they end at pipe EOF and are joined after the
    /// exit is observed.
    pub captures: Vec<JoinHandle<io::Result<()>>>,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open output sink: {0}")]
    Sink(#[source] io::Error),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Launches children and forwards signals to their process groups.
///
/// Implementations never wait for a child in the foreground: completion is
/// delivered through the reaper's wait channel, which keeps the daemon
/// functional whether or not it is PID 1.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    fn start(&self, spec: &Spec) -> Result<StartedChild, ExecError>;

    /// Graceful stop: SIGTERM to the child's process group, a bounded wait,
    /// then SIGKILL to the group.
    fn stop(&self, pid: u32, timeout: Duration) -> Result<(), ExecError>;

    /// Forwards a single signal to the child's process group.
    fn signal(&self, pid: u32, sig: Signal) -> Result<(), ExecError>;
}
