//! Change feed: a broadcast of variable changes to subscribers.
//!
//! Each subscription owns a bounded channel. Writers publish with `try_send`
//! while holding the context lock, so a slow subscriber loses events (counted
//! in [`ChangeFeed::dropped`]) instead of stalling writers. A subscription ends
//! when its [`ChangeStream`] is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

/// What happened to the variable named in a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The variable was written or cleared.
    Updated,
    /// The variable was deleted.
    Deleted,
    /// The whole context was cleared; the event carries no name.
    Cleared,
    /// An explicit `signal()` without a data change.
    Signaled,
}

/// One change observed on a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Context change sequence after this change.
    pub sequence: u64,
    /// What happened to the variable.
    pub kind: ChangeKind,
    /// Variable name.
    pub name: String,
    /// Record clock after the change (0 for deletions and clears).
    pub clock: u64,
}

#[derive(Debug)]
pub(crate) struct ChangeFeed {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
    dropped: AtomicU64,
}

impl ChangeFeed {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> ChangeStream {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        ChangeStream { rx }
    }

    /// Non-blocking fan-out; disconnected subscribers are pruned.
    pub(crate) fn publish(&self, event: &ChangeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A subscription to a context's change feed.
#[derive(Debug)]
pub struct ChangeStream {
    rx: Receiver<ChangeEvent>,
}

impl ChangeStream {
    /// Receive the next event, blocking. `None` once the context is gone.
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.rx.recv().ok()
    }

    /// Receive the next event, giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive an already queued event without blocking.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every queued event.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.rx.try_iter().collect()
    }
}
