use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::event::channel::{pub_sub, CancellationMessage, EventConsumer, EventPublisher};
use crate::util::spawn_named_thread;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A background task that has not been spawned yet.
///
/// The callback receives a cancellation consumer; long-running loops are
/// expected to poll it (`is_cancelled`) between units of work and bail out
/// when it fires.
pub struct Worker<F>
where
    F: FnOnce(EventConsumer<CancellationMessage>) + Send + 'static,
{
    name: String,
    callback: F,
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkerStopError {
    #[error("worker '{0}' did not stop before the deadline")]
    StopTimeout(String),

    #[error("worker '{0}' panicked")]
    Panicked(String),
}

impl<F> Worker<F>
where
    F: FnOnce(EventConsumer<CancellationMessage>) + Send + 'static,
{
    pub fn new<S: Into<String>>(name: S, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }

    pub fn start(self) -> RunningWorker {
        let (cancel_tx, cancel_rx) = pub_sub::<CancellationMessage>();
        let handle = spawn_named_thread(&self.name, move || (self.callback)(cancel_rx));
        RunningWorker {
            name: self.name,
            cancel_tx,
            handle,
        }
    }
}

/// Handle to a spawned [`Worker`].
pub struct RunningWorker {
    name: String,
    cancel_tx: EventPublisher<CancellationMessage>,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Requests cancellation without waiting for the thread to wind down.
    pub fn cancel(&self) {
        // A send failure means the thread already dropped its consumer, which
        // only happens on its way out.
        let _ = self.cancel_tx.publish(());
    }

    /// Cancels and joins, waiting indefinitely.
    pub fn stop_blocking(self) -> Result<(), WorkerStopError> {
        self.cancel();
        self.handle
            .join()
            .map_err(|_| WorkerStopError::Panicked(self.name))
    }

    /// Cancels and joins, giving up after `deadline`.
    pub fn stop_with_deadline(self, deadline: Duration) -> Result<(), WorkerStopError> {
        self.cancel();
        let give_up_at = Instant::now() + deadline;
        while Instant::now() < give_up_at {
            if self.handle.is_finished() {
                return self
                    .handle
                    .join()
                    .map_err(|_| WorkerStopError::Panicked(self.name));
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        Err(WorkerStopError::StopTimeout(self.name))
    }
}
