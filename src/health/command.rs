use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{Checker, HealthResult, ProbeError};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs a command (whitespace-split argv, no shell) and reports healthy iff
/// it exits 0 within the timeout.
pub struct CommandProbe {
    name: String,
    command: String,
}

impl CommandProbe {
    pub fn new(name: String, command: String) -> Self {
        Self { name, command }
    }
}

impl Checker for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "command"
    }

    fn check(&self, timeout: Duration) -> HealthResult {
        let begin = Instant::now();

        let mut argv = self.command.split_whitespace();
        let Some(program) = argv.next() else {
            return HealthResult::unhealthy(
                "no command configured",
                begin.elapsed(),
                ProbeError::EmptyCommand,
            );
        };

        let spawned = Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                return HealthResult::unhealthy(
                    format!("failed to run '{program}'"),
                    begin.elapsed(),
                    ProbeError::Io(err.to_string()),
                );
            }
        };

        let deadline = begin + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return if status.success() {
                        HealthResult::healthy(format!("'{program}' exited 0"), begin.elapsed())
                    } else {
                        let code = status.code().unwrap_or(-1);
                        HealthResult::unhealthy(
                            format!("'{program}' exited {code}"),
                            begin.elapsed(),
                            ProbeError::Io(format!("exit code {code}")),
                        )
                    };
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return HealthResult::unhealthy(
                            format!("'{program}' still running at deadline"),
                            begin.elapsed(),
                            ProbeError::Timeout(timeout),
                        );
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(err) => {
                    return HealthResult::unhealthy(
                        format!("wait on '{program}' failed"),
                        begin.elapsed(),
                        ProbeError::Io(err.to_string()),
                    );
                }
            }
        }
    }
}
