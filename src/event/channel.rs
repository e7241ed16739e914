use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// Sending half of a service event channel.
pub struct EventPublisher<E>(Sender<E>);

/// Receiving half of a service event channel.
#[derive(Debug)]
pub struct EventConsumer<E>(Receiver<E>);

#[derive(Debug, Error, PartialEq)]
pub enum EventPublisherError {
    #[error("error while publishing event: {0}")]
    SendError(String),
}

/// Builds a connected publisher/consumer pair.
pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = unbounded();
    (EventPublisher(s), EventConsumer(r))
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

impl<E> EventConsumer<E> {
    pub fn recv(&self) -> Option<E> {
        self.0.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<E> {
        self.0.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<E> {
        self.0.try_recv().ok()
    }
}

impl<E> AsRef<Receiver<E>> for EventConsumer<E> {
    fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }
}

impl<E> From<Receiver<E>> for EventConsumer<E> {
    fn from(value: Receiver<E>) -> Self {
        Self(value)
    }
}

/// Message carried by cancellation channels. The payload is irrelevant, only
/// the delivery (or the disconnection of the publisher) matters.
pub type CancellationMessage = ();

impl EventConsumer<CancellationMessage> {
    /// Blocks for up to `timeout` waiting for a cancellation message.
    ///
    /// Returns true if a message arrived or the publisher side is gone,
    /// false if the timeout elapsed without news.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        let timed_out = matches!(
            self.0.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        );
        !timed_out
    }
}
