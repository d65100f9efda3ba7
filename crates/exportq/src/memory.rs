//! Bounded in-memory queue.

use crate::error::{ConsumeError, QueueError};
use crate::queue::Queue;
use exportq_storage::Host;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A fixed-capacity producer/consumer exchange. If the queue fills up due
/// to slow consumers, new items are dropped rather than blocking the
/// producer. Nothing survives a restart.
pub struct BoundedMemoryQueue<T> {
    /// Send side, taken on shutdown so the channel closes and readers can
    /// drain the remaining items before exiting.
    tx: Mutex<Option<flume::Sender<T>>>,
    rx: flume::Receiver<T>,
    stopped: AtomicBool,
    capacity: usize,
}

impl<T> BoundedMemoryQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            stopped: AtomicBool::new(false),
            capacity,
        }
    }
}

impl<T: Send + 'static> Queue<T> for BoundedMemoryQueue<T> {
    async fn start(&self, _host: &dyn Host) -> Result<(), QueueError> {
        Ok(())
    }

    async fn offer(&self, item: T) -> Result<(), QueueError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(QueueError::Full);
        }
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => tx.try_send(item).map_err(|_| QueueError::Full),
            None => Err(QueueError::Full),
        }
    }

    async fn read(&self) -> Option<(u64, T)> {
        // Buffered items are still handed out after shutdown; the channel
        // reports disconnected only once it is drained.
        match self.rx.recv_async().await {
            Ok(item) => Some((0, item)),
            Err(_) => None,
        }
    }

    async fn on_processing_finished(&self, _index: u64, _outcome: Result<(), ConsumeError>) {
        // No durable state to clean up.
    }

    fn size(&self) -> i64 {
        self.rx.len() as i64
    }

    fn capacity(&self) -> i64 {
        self.capacity as i64
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        self.stopped.store(true, Ordering::Release);
        // Dropping the sender closes the channel. Idempotent: a second
        // shutdown finds it already taken.
        drop(self.tx.lock().unwrap().take());
        Ok(())
    }
}
