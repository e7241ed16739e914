use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::libc::c_int;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::trace;

use super::KernelError;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::util::worker::{RunningWorker, Worker};

const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

// One bit per signal number, set from the async handler and drained by the
// dispatcher thread. fetch_or on a lock-free atomic is async-signal-safe.
static PENDING_SIGNALS: AtomicU64 = AtomicU64::new(0);

extern "C" fn note_signal(signo: c_int) {
    if (0..64).contains(&signo) {
        PENDING_SIGNALS.fetch_or(1u64 << signo, Ordering::Relaxed);
    }
}

fn bit(sig: Signal) -> u64 {
    1u64 << (sig as i32)
}

/// Routes asynchronous Unix signals onto channels.
///
/// Handlers only record the signal number; a dedicated dispatcher thread
/// drains the pending set and publishes [`Signal`] values to every
/// subscription whose set matches. Subscriptions with disjoint sets coexist
/// (the supervisor watches termination/reload signals while the reaper
/// watches SIGCHLD).
pub struct SignalMonitor {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    dispatcher: Option<RunningWorker>,
}

struct Subscription {
    mask: u64,
    tx: EventPublisher<Signal>,
}

impl Default for SignalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalMonitor {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            dispatcher: None,
        }
    }

    /// Subscribes to `signals`, installing handlers for each and returning a
    /// channel on which they will be delivered.
    pub fn notify(&mut self, signals: &[Signal]) -> Result<EventConsumer<Signal>, KernelError> {
        let mut mask = 0u64;
        for sig in signals {
            install_handler(*sig)?;
            mask |= bit(*sig);
        }

        let (tx, rx) = pub_sub();
        self.subscriptions
            .lock()
            .expect("signal subscription lock poisoned")
            .push(Subscription { mask, tx });

        if self.dispatcher.is_none() {
            self.dispatcher = Some(self.spawn_dispatcher());
        }
        Ok(rx)
    }

    fn spawn_dispatcher(&self) -> RunningWorker {
        let subscriptions = self.subscriptions.clone();
        Worker::new("signal dispatcher", move |cancel| loop {
            let pending = PENDING_SIGNALS.swap(0, Ordering::Relaxed);
            if pending != 0 {
                let mut subs = subscriptions
                    .lock()
                    .expect("signal subscription lock poisoned");
                for signo in 0..64 {
                    if pending & (1u64 << signo) == 0 {
                        continue;
                    }
                    let Ok(sig) = Signal::try_from(signo as i32) else {
                        continue;
                    };
                    trace!(signal = %sig, "dispatching signal");
                    subs.retain(|s| s.mask & bit(sig) == 0 || s.tx.publish(sig).is_ok());
                }
            }
            if cancel.is_cancelled(DISPATCH_POLL_INTERVAL) {
                break;
            }
        })
        .start()
    }

    /// Stops delivering signals. Already-installed handlers stay in place but
    /// their notes are no longer drained.
    pub fn stop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.stop_blocking();
        }
        self.subscriptions
            .lock()
            .expect("signal subscription lock poisoned")
            .clear();
    }
}

impl Drop for SignalMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn install_handler(sig: Signal) -> Result<(), KernelError> {
    // SIGKILL/SIGSTOP cannot be caught; surface that as an OS error the same
    // way sigaction would.
    let flags = if sig == Signal::SIGCHLD {
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP
    } else {
        SaFlags::SA_RESTART
    };
    let action = SigAction::new(SigHandler::Handler(note_signal), flags, SigSet::empty());
    unsafe { signal::sigaction(sig, &action) }
        .map(|_| ())
        .map_err(|err| KernelError::os("sigaction", err))
}

/// Sends `sig` to a single process.
pub fn forward(pid: u32, sig: Signal) -> Result<(), KernelError> {
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(|err| KernelError::os("kill", err))
}

/// Sends `sig` to every member of the process group `pgid`.
pub fn forward_to_group(pgid: u32, sig: Signal) -> Result<(), KernelError> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
        .map_err(|err| KernelError::os("kill process group", err))
}

pub fn is_term_signal(sig: Signal) -> bool {
    matches!(
        sig,
        Signal::SIGTERM | Signal::SIGINT | Signal::SIGQUIT | Signal::SIGKILL
    )
}

pub fn is_reload_signal(sig: Signal) -> bool {
    sig == Signal::SIGHUP
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Marks this process as a child subreaper so orphaned grandchildren
        /// re-parent under it instead of PID 1.
        pub fn set_child_subreaper() -> Result<(), KernelError> {
            nix::sys::prctl::set_child_subreaper(true)
                .map_err(|err| KernelError::os("prctl(PR_SET_CHILD_SUBREAPER)", err))
        }

        pub fn clear_child_subreaper() -> Result<(), KernelError> {
            nix::sys::prctl::set_child_subreaper(false)
                .map_err(|err| KernelError::os("prctl(PR_SET_CHILD_SUBREAPER)", err))
        }

        pub fn is_child_subreaper() -> Result<bool, KernelError> {
            nix::sys::prctl::get_child_subreaper()
                .map_err(|err| KernelError::os("prctl(PR_GET_CHILD_SUBREAPER)", err))
        }
    } else {
        pub fn set_child_subreaper() -> Result<(), KernelError> {
            Err(KernelError::NotSupported("child subreaper"))
        }

        pub fn clear_child_subreaper() -> Result<(), KernelError> {
            Err(KernelError::NotSupported("child subreaper"))
        }

        pub fn is_child_subreaper() -> Result<bool, KernelError> {
            Err(KernelError::NotSupported("child subreaper"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_and_reload_classification() {
        assert!(is_term_signal(Signal::SIGTERM));
        assert!(is_term_signal(Signal::SIGINT));
        assert!(is_term_signal(Signal::SIGQUIT));
        assert!(is_term_signal(Signal::SIGKILL));
        assert!(!is_term_signal(Signal::SIGHUP));

        assert!(is_reload_signal(Signal::SIGHUP));
        assert!(!is_reload_signal(Signal::SIGTERM));
    }

    #[test]
    #[serial_test::serial(children)]
    fn raised_signal_arrives_on_the_subscribed_channel() {
        let mut monitor = SignalMonitor::new();
        let rx = monitor.notify(&[Signal::SIGUSR1]).unwrap();

        signal::raise(Signal::SIGUSR1).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Some(Signal::SIGUSR1));
        monitor.stop();
    }

    #[test]
    #[serial_test::serial(children)]
    fn unrelated_signals_are_not_delivered() {
        let mut monitor = SignalMonitor::new();
        let usr2 = monitor.notify(&[Signal::SIGUSR2]).unwrap();

        signal::raise(Signal::SIGUSR2).unwrap();
        assert_eq!(
            usr2.recv_timeout(Duration::from_secs(2)),
            Some(Signal::SIGUSR2)
        );
        // Nothing else queued.
        assert_eq!(usr2.try_recv(), None);
        monitor.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial_test::serial(children)]
    fn subreaper_roundtrip() {
        set_child_subreaper().unwrap();
        assert!(is_child_subreaper().unwrap());
        clear_child_subreaper().unwrap();
        assert!(!is_child_subreaper().unwrap());
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn subreaper_reports_not_supported() {
        assert!(set_child_subreaper().unwrap_err().is_not_supported());
    }
}
