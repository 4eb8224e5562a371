//! Unbounded FIFO of job IDs feeding the single worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::JobQueueError;

/// Outcome of a bounded wait on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popped {
    Job(Uuid),
    TimedOut,
    Closed,
}

/// FIFO work queue. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append an ID. Never blocks; fails only after [`WorkQueue::close`].
    pub fn push(&self, id: Uuid) -> Result<(), JobQueueError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(id).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            JobQueueError::Closed
        })
    }

    /// Wait up to `timeout` for the next ID.
    pub async fn pop(&self, timeout: Duration) -> Popped {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(id)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Popped::Job(id)
            }
            Ok(None) => Popped::Closed,
            Err(_) => Popped::TimedOut,
        }
    }

    /// Stop accepting new IDs. Already queued IDs can still be popped.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    /// Number of IDs waiting to be popped.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
