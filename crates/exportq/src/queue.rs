//! The queue contract shared by the in-memory and persistent variants.

use crate::codec::Codec;
use crate::config::QueueConfig;
use crate::error::{ConsumeError, QueueError};
use crate::memory::BoundedMemoryQueue;
use crate::persistent::PersistentQueue;
use crate::sizer::Sizer;
use exportq_storage::{ComponentId, Host, Signal};
use log::error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A bounded FIFO hand-off between telemetry producers and exporter
/// consumers.
///
/// `offer` never blocks; `read` suspends until an item is available or the
/// queue is stopped. Every item handed out by `read` must be finalised via
/// `on_processing_finished` with the consumer's outcome.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch use [`DynQueue`], implemented for every `Queue` via
/// a blanket impl.
pub trait Queue<T>: Send + Sync {
    /// Acquires external resources (e.g. a storage client) and restores
    /// persisted state. Must be called before producing or consuming.
    fn start(&self, host: &dyn Host) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Inserts `item` immediately or fails; never blocks beyond the
    /// underlying storage batch. Safe to call concurrently with itself,
    /// `read` and `shutdown`.
    fn offer(&self, item: T) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Blocks until an item is available, then delivers it to exactly one
    /// caller. Returns `None` once the queue is stopped.
    fn read(&self) -> impl Future<Output = Option<(u64, T)>> + Send;

    /// Reports the consumer outcome for an item previously returned by
    /// `read`.
    fn on_processing_finished(
        &self,
        index: u64,
        outcome: Result<(), ConsumeError>,
    ) -> impl Future<Output = ()> + Send;

    /// Current occupancy in sizer units. May lag slightly under concurrent
    /// mutation.
    fn size(&self) -> i64;

    /// Maximum occupancy in sizer units.
    fn capacity(&self) -> i64;

    /// Returns `true` if items survive a process restart.
    fn is_persistent(&self) -> bool;

    /// Stops the queue: wakes all blocked readers and releases resources
    /// once in-flight items are finalised. Idempotent.
    fn shutdown(&self) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// Object-safe version of [`Queue`] for dynamic dispatch.
pub trait DynQueue<T>: Send + Sync {
    fn start_boxed<'a>(
        &'a self,
        host: &'a dyn Host,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a;

    fn offer_boxed<'a>(
        &'a self,
        item: T,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a;

    fn read_boxed<'a>(&'a self) -> Pin<Box<dyn Future<Output = Option<(u64, T)>> + Send + 'a>>
    where
        T: 'a;

    fn on_processing_finished_boxed<'a>(
        &'a self,
        index: u64,
        outcome: Result<(), ConsumeError>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
    where
        T: 'a;

    fn size(&self) -> i64;

    fn capacity(&self) -> i64;

    fn is_persistent(&self) -> bool;

    fn shutdown_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a;
}

/// Blanket implementation: any `Queue` can be used as a `DynQueue`.
impl<T, Q: Queue<T>> DynQueue<T> for Q {
    fn start_boxed<'a>(
        &'a self,
        host: &'a dyn Host,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.start(host))
    }

    fn offer_boxed<'a>(
        &'a self,
        item: T,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.offer(item))
    }

    fn read_boxed<'a>(&'a self) -> Pin<Box<dyn Future<Output = Option<(u64, T)>> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.read())
    }

    fn on_processing_finished_boxed<'a>(
        &'a self,
        index: u64,
        outcome: Result<(), ConsumeError>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.on_processing_finished(index, outcome))
    }

    fn size(&self) -> i64 {
        Queue::size(self)
    }

    fn capacity(&self) -> i64 {
        Queue::capacity(self)
    }

    fn is_persistent(&self) -> bool {
        Queue::is_persistent(self)
    }

    fn shutdown_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.shutdown())
    }
}

/// Capability bundle a queue is built around: the identity it acquires
/// storage under, plus the sizer and codec for its item type.
pub struct QueueSettings<T> {
    pub owner: ComponentId,
    pub signal: Signal,
    pub sizer: Arc<dyn Sizer<T>>,
    pub codec: Arc<dyn Codec<T>>,
}

/// Pass-through used when the queue is disabled by configuration. Every
/// offer is logged and rejected; nothing is buffered.
pub struct DisabledQueue;

impl<T: Send + 'static> Queue<T> for DisabledQueue {
    async fn start(&self, _host: &dyn Host) -> Result<(), QueueError> {
        Ok(())
    }

    async fn offer(&self, _item: T) -> Result<(), QueueError> {
        error!("Rejecting request: sending queue is disabled");
        Err(QueueError::Disabled)
    }

    async fn read(&self) -> Option<(u64, T)> {
        None
    }

    async fn on_processing_finished(&self, _index: u64, _outcome: Result<(), ConsumeError>) {}

    fn size(&self) -> i64 {
        0
    }

    fn capacity(&self) -> i64 {
        0
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Builds the queue variant selected by `config`: disabled pass-through,
/// bounded memory queue, or storage-backed persistent queue.
pub fn build_queue<T>(config: &QueueConfig, settings: QueueSettings<T>) -> Arc<dyn DynQueue<T>>
where
    T: Send + Sync + 'static,
{
    if !config.enabled {
        return Arc::new(DisabledQueue);
    }
    match &config.storage_id {
        None => Arc::new(BoundedMemoryQueue::new(config.queue_size.max(0) as usize)),
        Some(storage_id) => Arc::new(PersistentQueue::new(
            storage_id.clone(),
            config.queue_size,
            settings,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::sizer::RequestSizer;
    use exportq_storage::ExtensionHost;

    fn settings() -> QueueSettings<u64> {
        QueueSettings {
            owner: ComponentId::new("otlp"),
            signal: Signal::Traces,
            sizer: Arc::new(RequestSizer),
            codec: Arc::new(BincodeCodec::new()),
        }
    }

    #[tokio::test]
    async fn test_disabled_queue_rejects_offers() {
        let queue = DisabledQueue;
        let host = ExtensionHost::new();
        Queue::<u64>::start(&queue, &host).await.unwrap();

        assert_eq!(queue.offer(1u64).await, Err(QueueError::Disabled));
        assert_eq!(Queue::<u64>::size(&queue), 0);
        assert_eq!(Queue::<u64>::read(&queue).await, None);
        Queue::<u64>::shutdown(&queue).await.unwrap();
    }

    #[test]
    fn test_factory_selects_variant() {
        let disabled = build_queue(&QueueConfig::disabled(), settings());
        assert!(!disabled.is_persistent());
        assert_eq!(disabled.capacity(), 0);

        let memory = build_queue(&QueueConfig::default().with_queue_size(5), settings());
        assert!(!memory.is_persistent());
        assert_eq!(memory.capacity(), 5);

        let config = QueueConfig::default().with_storage(ComponentId::new("file_storage"));
        let persistent = build_queue(&config, settings());
        assert!(persistent.is_persistent());
        assert_eq!(persistent.capacity(), 1000);
    }
}
