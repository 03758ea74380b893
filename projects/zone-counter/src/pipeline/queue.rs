// Bounded inter-stage queue: non-blocking push, blocking pop with timeout

use crate::config::DropPolicy;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The pushed item was discarded
    DroppedNewest,
    /// The oldest queued item was evicted to make room
    EvictedOldest,
}

/// Depth of one queue at sampling time
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueDepth {
    pub len: usize,
    pub capacity: usize,
    pub dropped: usize,
}

/// FIFO bounded buffer between two pipeline stages.
///
/// The queue keeps a receiver of its own so `DropOldest` can evict from the
/// producer side.
pub struct StageQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicUsize,
}

impl<T> StageQueue<T> {
    pub fn new(name: &'static str, capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self {
            name,
            tx,
            rx,
            capacity,
            policy,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Push without blocking, applying the drop policy when full.
    pub fn push(&self, item: T) -> PushOutcome {
        let item = match self.tx.try_send(item) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => item,
        };

        self.dropped.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            DropPolicy::DropNewest => {
                tracing::debug!("{} queue full, dropping newest item", self.name);
                PushOutcome::DroppedNewest
            }
            DropPolicy::DropOldest => {
                let _evicted = self.rx.try_recv();
                tracing::debug!("{} queue full, evicting oldest item", self.name);
                match self.tx.try_send(item) {
                    Ok(()) => PushOutcome::EvictedOldest,
                    // Only reachable if another producer refilled the slot
                    Err(_) => PushOutcome::DroppedNewest,
                }
            }
        }
    }

    /// Block up to `timeout` for the next item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take whatever is queued right now, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            len: self.len(),
            capacity: self.capacity,
            dropped: self.dropped(),
        }
    }
}
