//! Hookup between a knowledge base and the transports that replicate it.
//!
//! The network layer itself lives outside this crate. A transport only has to
//! accept [`ModifiedBatch`]es; received updates come back in through
//! [`KnowledgeBase::apply_batch`](super::KnowledgeBase::apply_batch), which
//! writes them with remote stamps through the ordinary `set` path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{KarlError, KarlResult};
use crate::record::Record;

/// The modifications drained from a context in one send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedBatch {
    /// Id of the knowledge base that produced the batch.
    pub origin: String,
    /// Context clock when the batch was drained.
    pub clock: u64,
    /// Variable names and their records, in modification order.
    pub updates: Vec<(String, Record)>,
}

impl ModifiedBatch {
    /// Number of updates in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// True when the batch carries no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Outbound side of a transport.
///
/// Implementations must be cheap to call while the context lock is held:
/// `send` runs inside the evaluate-then-send critical section.
pub trait Transport: Send + Sync {
    /// Identifier used in logs and by `remove_transport`.
    fn id(&self) -> &str;

    /// Hands a batch to the transport. Returns the number of updates accepted.
    fn send(&self, batch: &ModifiedBatch) -> KarlResult<usize>;

    /// Stops the transport. Later sends may fail.
    fn close(&self) {}
}

/// An in-process transport that queues batches on a bounded channel.
///
/// Useful for wiring knowledge bases together inside one process and in
/// tests. A full queue rejects the batch instead of blocking the sender.
#[derive(Debug)]
pub struct ChannelTransport {
    id: String,
    tx: Sender<ModifiedBatch>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl ChannelTransport {
    /// Creates a transport and the receiver its batches arrive on.
    #[must_use]
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, Receiver<ModifiedBatch>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                id: id.into(),
                tx,
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Batches rejected because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True once [`Transport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn failure(&self, message: &str) -> KarlError {
        KarlError::Transport {
            transport: self.id.clone(),
            message: message.to_string(),
        }
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, batch: &ModifiedBatch) -> KarlResult<usize> {
        if self.is_closed() {
            return Err(self.failure("transport closed"));
        }
        match self.tx.try_send(batch.clone()) {
            Ok(()) => Ok(batch.len()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(self.failure("queue full"))
            }
            Err(TrySendError::Disconnected(_)) => Err(self.failure("receiver disconnected")),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
