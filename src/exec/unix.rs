use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::{ExecError, Executor, Spec, StartedChild};
use crate::capture::spawn_capture;
use crate::kernel::reaper::ChildRegistry;
use crate::kernel::signal::forward_to_group;
use crate::kernel::{process_group, KernelError};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The real fork/exec path. Children are placed in their own process group,
/// optionally switched to the configured credentials, wired into the capture
/// pipeline and registered with the reaper before the handle is returned.
pub struct UnixExecutor {
    registry: Arc<ChildRegistry>,
}

impl UnixExecutor {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self { registry }
    }
}

impl Executor for UnixExecutor {
    fn start(&self, spec: &Spec) -> Result<StartedChild, ExecError> {
        let (program, args) = spec.command.split_first().ok_or(ExecError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let stdout_sink = spec.stdout.open().map_err(ExecError::Sink)?;
        let stderr_sink = spec.stderr.open().map_err(ExecError::Sink)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(spec.stdout.stdio())
            .stderr(spec.stderr.stdio());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        process_group::prepare(&mut cmd, spec.credentials);

        let started_at = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (launch_id, wait) = self.registry.register(pid, started_at);
        debug!(service = spec.name, pid, %launch_id, "child launched");

        let mut captures = Vec::new();
        if let Some(sink) = stdout_sink {
            let pipe = child.stdout.take().expect("stdout was configured piped");
            captures.push(spawn_capture(&format!("{} stdout", spec.name), pipe, sink));
        }
        if let Some(sink) = stderr_sink {
            let pipe = child.stderr.take().expect("stderr was configured piped");
            captures.push(spawn_capture(&format!("{} stderr", spec.name), pipe, sink));
        }

        // The reaper owns the wait; dropping the std handle neither kills nor
        // reaps the child.
        drop(child);

        Ok(StartedChild {
            launch_id,
            pid,
            wait,
            captures,
        })
    }

    fn stop(&self, pid: u32, timeout: Duration) -> Result<(), ExecError> {
        match forward_to_group(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(err) if is_gone(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !alive(pid) {
                return Ok(());
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        warn!(pid, "stop timeout elapsed, killing process group");
        match forward_to_group(pid, Signal::SIGKILL) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn signal(&self, pid: u32, sig: Signal) -> Result<(), ExecError> {
        forward_to_group(pid, sig).map_err(ExecError::from)
    }
}

fn is_gone(err: &KernelError) -> bool {
    matches!(
        err,
        KernelError::Os {
            source: Errno::ESRCH,
            ..
        }
    )
}

/// Whether the process still exists (zombies count as gone once reaped).
fn alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
