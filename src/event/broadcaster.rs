use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Fan-out channel for lifecycle events.
///
/// Every subscriber owns a bounded queue. When a subscriber falls behind, the
/// oldest queued event is dropped to make room and the loss is recorded on
/// that subscriber's lag counter. Publishing never blocks.
#[derive(Clone)]
pub struct EventBroadcaster<T> {
    subscribers: Arc<Mutex<Vec<SubscriberSlot<T>>>>,
    capacity: usize,
}

struct SubscriberSlot<T> {
    tx: Sender<T>,
    // Kept so the broadcaster can drain the oldest entry on overflow.
    rx: Receiver<T>,
    lagged: Arc<AtomicU64>,
}

/// Receiving end handed out by [`EventBroadcaster::subscribe`].
pub struct EventSubscriber<T> {
    rx: Receiver<T>,
    lagged: Arc<AtomicU64>,
}

impl<T: Clone> Default for EventBroadcaster<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl<T: Clone> EventBroadcaster<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> EventSubscriber<T> {
        let (tx, rx) = bounded(self.capacity);
        let lagged = Arc::new(AtomicU64::new(0));
        self.subscribers
            .lock()
            .expect("subscriber list lock poisoned")
            .push(SubscriberSlot {
                tx,
                rx: rx.clone(),
                lagged: lagged.clone(),
            });
        EventSubscriber { rx, lagged }
    }

    /// Delivers `event` to every live subscriber, dropping the oldest queued
    /// event of any subscriber whose queue is full. Disconnected subscribers
    /// are pruned.
    pub fn broadcast(&self, event: T) {
        self.subscribers
            .lock()
            .expect("subscriber list lock poisoned")
            .retain(|slot| match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Disconnected(_)) => false,
                Err(TrySendError::Full(ev)) => {
                    if slot.rx.try_recv().is_ok() {
                        slot.lagged.fetch_add(1, Ordering::Relaxed);
                    }
                    slot.tx.try_send(ev).is_ok()
                }
            });
    }
}

impl<T> EventSubscriber<T> {
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of events this subscriber missed because it fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }

    pub fn iter(&self) -> crossbeam::channel::Iter<'_, T> {
        self.rx.iter()
    }
}
