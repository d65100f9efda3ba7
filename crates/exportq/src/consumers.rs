//! Consumer worker pool draining a queue into a user callback.

use crate::error::{ConsumeError, QueueError};
use crate::queue::DynQueue;
use exportq_storage::Host;
use log::error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Callback invoked once per item pulled from the queue.
///
/// Uses native async fn in traits; for dynamic dispatch use
/// [`ConsumeItemBoxed`].
pub trait ConsumeItem<T>: Send + Sync {
    fn consume(&self, item: T) -> impl Future<Output = Result<(), ConsumeError>> + Send;
}

/// Object-safe version of [`ConsumeItem`] for dynamic dispatch.
pub trait ConsumeItemBoxed<T>: Send + Sync {
    fn consume_boxed<'a>(
        &'a self,
        item: T,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumeError>> + Send + 'a>>
    where
        T: 'a;
}

/// Blanket implementation: any `ConsumeItem` can be used boxed.
impl<T, C: ConsumeItem<T>> ConsumeItemBoxed<T> for C {
    fn consume_boxed<'a>(
        &'a self,
        item: T,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumeError>> + Send + 'a>>
    where
        T: 'a,
    {
        Box::pin(self.consume(item))
    }
}

/// A fixed set of workers that pull items from a queue and hand them to a
/// callback, reporting each outcome back through
/// `on_processing_finished`.
pub struct QueueConsumers<T: Send + 'static> {
    queue: Arc<dyn DynQueue<T>>,
    num_consumers: usize,
    consume: Arc<dyn ConsumeItemBoxed<T>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> QueueConsumers<T> {
    pub fn new(
        queue: Arc<dyn DynQueue<T>>,
        num_consumers: usize,
        consume: Arc<dyn ConsumeItemBoxed<T>>,
    ) -> Self {
        Self {
            queue,
            num_consumers,
            consume,
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// The queue this pool drains.
    pub fn queue(&self) -> &Arc<dyn DynQueue<T>> {
        &self.queue
    }

    /// Starts the queue, then spawns the workers. Each worker exits when
    /// the queue reports the stopped sentinel.
    pub async fn start(&self, host: &dyn Host) -> Result<(), QueueError> {
        self.queue.start_boxed(host).await?;

        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.num_consumers {
            let queue = Arc::clone(&self.queue);
            let consume = Arc::clone(&self.consume);
            workers.push(tokio::spawn(async move {
                while let Some((index, item)) = queue.read_boxed().await {
                    let outcome = consume.consume_boxed(item).await;
                    queue.on_processing_finished_boxed(index, outcome).await;
                }
            }));
        }
        Ok(())
    }

    /// Shuts the queue down and joins every worker. Once this returns, no
    /// callback will be invoked again.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let shutdown_result = self.queue.shutdown_boxed().await;

        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for worker in workers {
            if let Err(err) = worker.await {
                error!("Queue consumer task failed: {err}");
            }
        }
        shutdown_result
    }
}
