use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::select;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::exec::ExitResult;
use crate::util::worker::{RunningWorker, Worker};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const UNCLAIMED_RETENTION: Duration = Duration::from_secs(60);

/// Monotonic identifier for one child launch.
///
/// Children are tracked by launch id, never by pid alone: the kernel recycles
/// pids, so the pid index is only valid between registration and reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId(u64);

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "launch-{}", self.0)
    }
}

struct Registration {
    started_at: Instant,
    tx: EventPublisher<ExitResult>,
}

struct UnclaimedExit {
    code: i32,
    signal: Option<Signal>,
    reaped_at: Instant,
}

#[derive(Default)]
struct RegistryInner {
    by_launch: HashMap<LaunchId, Registration>,
    by_pid: HashMap<u32, LaunchId>,
    // Exits observed before the launcher managed to register the pid. Kept
    // briefly so registration can still claim them.
    unclaimed: HashMap<u32, UnclaimedExit>,
}

/// Shared table connecting launched pids to the channels awaiting their
/// [`ExitResult`]. Written by the executor on launch and by the reaper on
/// `wait()` completion.
#[derive(Default)]
pub struct ChildRegistry {
    inner: Mutex<RegistryInner>,
    next_launch: AtomicU64,
}

impl ChildRegistry {
    /// Registers a freshly spawned child and returns the channel its exit
    /// will be delivered on. If the child already exited (and was reaped)
    /// between spawn and registration, the result is delivered immediately.
    pub fn register(&self, pid: u32, started_at: Instant) -> (LaunchId, EventConsumer<ExitResult>) {
        let id = LaunchId(self.next_launch.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = pub_sub();

        let mut inner = self.inner.lock().expect("child registry lock poisoned");
        if let Some(exit) = inner.unclaimed.remove(&pid) {
            let _ = tx.publish(ExitResult {
                code: exit.code,
                signal: exit.signal,
                duration: exit.reaped_at.saturating_duration_since(started_at),
            });
            return (id, rx);
        }

        inner.by_launch.insert(id, Registration { started_at, tx });
        inner.by_pid.insert(pid, id);
        (id, rx)
    }

    /// Number of launches still awaiting an exit.
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .expect("child registry lock poisoned")
            .by_launch
            .len()
    }

    fn record_exit(&self, pid: u32, code: i32, signal: Option<Signal>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("child registry lock poisoned");

        match inner.by_pid.remove(&pid) {
            Some(id) => {
                let reg = inner
                    .by_launch
                    .remove(&id)
                    .expect("pid index out of sync with launch table");
                trace!(pid, %id, code, "delivering exit result");
                let _ = reg.tx.publish(ExitResult {
                    code,
                    signal,
                    duration: now.saturating_duration_since(reg.started_at),
                });
            }
            None => {
                debug!(pid, code, "reaped a process with no registration");
                inner.unclaimed.insert(
                    pid,
                    UnclaimedExit {
                        code,
                        signal,
                        reaped_at: now,
                    },
                );
                inner
                    .unclaimed
                    .retain(|_, e| now.duration_since(e.reaped_at) < UNCLAIMED_RETENTION);
            }
        }
    }
}

/// Drains every reapable child via `wait(-1, WNOHANG)` and records the
/// results. Returns how many children were reaped.
pub fn reap_once(registry: &ChildRegistry) -> usize {
    let mut count = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                registry.record_exit(pid.as_raw() as u32, code, None);
                count += 1;
            }
            Ok(WaitStatus::Signaled(pid, sig, _core_dumped)) => {
                registry.record_exit(pid.as_raw() as u32, 128 + sig as i32, Some(sig));
                count += 1;
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(other) => {
                trace!(status = ?other, "ignoring non-exit wait status");
            }
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(err) => {
                warn!(error = %err, "unexpected wait() failure while reaping");
                break;
            }
        }
    }
    count
}

/// Background task that turns SIGCHLD into `wait()` drains.
///
/// A short poll interval backs up the signal path so a coalesced or lost
/// SIGCHLD can only delay a reap, never leak a zombie.
pub struct ZombieReaper {
    registry: Arc<ChildRegistry>,
    worker: Option<RunningWorker>,
}

impl ZombieReaper {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self {
            registry,
            worker: None,
        }
    }

    pub fn registry(&self) -> Arc<ChildRegistry> {
        self.registry.clone()
    }

    /// Starts the reap loop, waking on `sigchld` notifications.
    pub fn start(&mut self, sigchld: EventConsumer<Signal>) {
        let registry = self.registry.clone();
        let worker = Worker::new("zombie reaper", move |cancel| {
            let never_sig = crossbeam::channel::never::<Signal>();
            let mut sigchld_open = true;
            loop {
                reap_once(&registry);
                let sig_rx = if sigchld_open {
                    sigchld.as_ref().clone()
                } else {
                    // Notification source gone; fall back to pure polling.
                    never_sig.clone()
                };
                select! {
                    recv(sig_rx) -> msg => {
                        if msg.is_err() {
                            sigchld_open = false;
                        }
                    }
                    recv(cancel.as_ref()) -> _ => {
                        reap_once(&registry);
                        break;
                    }
                    default(REAP_POLL_INTERVAL) => {}
                }
            }
        })
        .start();
        self.worker = Some(worker);
    }

    /// Stops the loop after one final synchronous drain.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.stop_blocking() {
                warn!(error = %err, "reaper did not stop cleanly");
            }
        }
    }
}

impl Drop for ZombieReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use serial_test::serial;

    fn spawn_true() -> u32 {
        let child = Command::new("true")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn true");
        let pid = child.id();
        // Dropping a Child neither kills nor waits; the registry owns the wait.
        drop(child);
        pid
    }

    #[test]
    #[serial(children)]
    fn registered_child_gets_its_exit_result() {
        let registry = ChildRegistry::default();
        let pid = spawn_true();
        let (_id, rx) = registry.register(pid, Instant::now());

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.tracked() > 0 && Instant::now() < deadline {
            reap_once(&registry);
            std::thread::sleep(Duration::from_millis(10));
        }

        let exit = rx.recv_timeout(Duration::from_secs(1)).expect("exit result");
        assert_eq!(exit.code, 0);
        assert_eq!(exit.signal, None);
        assert_eq!(registry.tracked(), 0);
    }

    #[test]
    #[serial(children)]
    fn exit_before_registration_is_claimed_on_register() {
        let registry = ChildRegistry::default();
        let started = Instant::now();
        let pid = spawn_true();

        // Let it exit and get reaped before anyone registers it.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let reaped = reap_once(&registry);
            if reaped > 0 || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let (_id, rx) = registry.register(pid, started);
        let exit = rx.recv_timeout(Duration::from_secs(1)).expect("claimed exit");
        assert_eq!(exit.code, 0);
    }

    #[test]
    #[serial(children)]
    fn no_double_reap_for_the_same_launch() {
        let registry = ChildRegistry::default();
        let pid = spawn_true();
        let (_id, rx) = registry.register(pid, Instant::now());

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.tracked() > 0 && Instant::now() < deadline {
            reap_once(&registry);
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_some());
        // The wait channel saw exactly one result.
        assert!(rx.try_recv().is_none());
    }

    #[test]
    #[serial(children)]
    fn background_reaper_delivers_without_explicit_drains() {
        let registry = Arc::new(ChildRegistry::default());
        let mut reaper = ZombieReaper::new(registry.clone());
        let (_sigchld_tx, sigchld_rx) = pub_sub();
        reaper.start(sigchld_rx);

        let pid = spawn_true();
        let (_id, rx) = registry.register(pid, Instant::now());

        let exit = rx.recv_timeout(Duration::from_secs(5)).expect("exit result");
        assert_eq!(exit.code, 0);
        reaper.stop();
    }
}
