//! # Exporter Queue Demo
//!
//! End-to-end walkthrough of the queue subsystem:
//!
//! 1. A persistent queue backed by the in-memory storage extension
//! 2. A consumer pool delivering batches to a simulated backend
//! 3. A simulated kill while items are queued, followed by a restart that
//!    recovers them from storage
//!
//! ## Running
//!
//! ```bash
//! cargo run -p exportq --bin demo
//! ```

use exportq::{
    build_queue, BincodeCodec, BytesSizer, ByteSized, ConsumeError, ConsumeItem,
    ConsumeItemBoxed, DynQueue, QueueConfig, QueueConsumers, QueueSettings,
};
use exportq_storage::{ComponentId, Extension, ExtensionHost, InMemoryStorage, Signal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STORAGE_ID: &str = "file_storage/demo";

/// A telemetry batch travelling through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetricBatch {
    scope: String,
    points: Vec<u64>,
}

impl ByteSized for MetricBatch {
    fn byte_size(&self) -> usize {
        self.scope.len() + self.points.len() * 8
    }
}

/// Simulated backend: counts deliveries and pretends each takes a moment.
struct Backend {
    delivered: AtomicU64,
}

impl ConsumeItem<MetricBatch> for Backend {
    async fn consume(&self, batch: MetricBatch) -> Result<(), ConsumeError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let total = self.delivered.fetch_add(1, Ordering::AcqRel) + 1;
        println!(
            "  delivered batch scope={} points={} (total {total})",
            batch.scope,
            batch.points.len()
        );
        Ok(())
    }
}

fn batch(scope: &str, n: u64) -> MetricBatch {
    MetricBatch {
        scope: scope.to_string(),
        points: (0..n).collect(),
    }
}

fn settings() -> QueueSettings<MetricBatch> {
    QueueSettings {
        owner: ComponentId::new("otlp/primary"),
        signal: Signal::Metrics,
        sizer: Arc::new(BytesSizer),
        codec: Arc::new(BincodeCodec::new()),
    }
}

#[tokio::main]
async fn main() {
    let storage = Arc::new(InMemoryStorage::new());
    let host = ExtensionHost::new().with_extension(
        ComponentId::new(STORAGE_ID),
        Arc::clone(&storage) as Arc<dyn Extension>,
    );
    let config = QueueConfig::default()
        .with_queue_size(4096)
        .with_num_consumers(2)
        .with_storage(ComponentId::new(STORAGE_ID));
    config.validate().expect("valid config");

    println!("=== Phase 1: enqueue and deliver ===");
    let queue = build_queue(&config, settings());
    let backend = Arc::new(Backend {
        delivered: AtomicU64::new(0),
    });
    let consumers = QueueConsumers::new(
        Arc::clone(&queue),
        config.num_consumers,
        Arc::clone(&backend) as Arc<dyn ConsumeItemBoxed<MetricBatch>>,
    );
    consumers.start(&host).await.expect("queue start");

    for i in 0..8u64 {
        let batch = batch(&format!("service-{}", i % 3), 16);
        queue.offer_boxed(batch).await.expect("offer");
    }
    while backend.delivered.load(Ordering::Acquire) < 8 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    consumers.shutdown().await.expect("shutdown");
    println!(
        "delivered {} batches, queue size {}",
        backend.delivered.load(Ordering::Acquire),
        queue.size()
    );

    println!("\n=== Phase 2: enqueue, then die before delivering ===");
    {
        let queue = build_queue(&config, settings());
        queue.start_boxed(&host).await.expect("queue start");
        for i in 0..7u64 {
            queue.offer_boxed(batch("orphaned", 8 + i)).await.expect("offer");
        }
        println!("queued 7 batches, size {} bytes; killing process...", queue.size());
        // Dropped without shutdown: everything stays in storage.
    }

    println!("\n=== Phase 3: restart and recover ===");
    let queue = build_queue(&config, settings());
    let backend = Arc::new(Backend {
        delivered: AtomicU64::new(0),
    });
    let consumers = QueueConsumers::new(
        Arc::clone(&queue),
        config.num_consumers,
        Arc::clone(&backend) as Arc<dyn ConsumeItemBoxed<MetricBatch>>,
    );
    consumers.start(&host).await.expect("queue start");
    println!("restored queue size: {} bytes", queue.size());

    while backend.delivered.load(Ordering::Acquire) < 7 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    consumers.shutdown().await.expect("shutdown");
    println!(
        "recovered and delivered {} batches, queue size {}",
        backend.delivered.load(Ordering::Acquire),
        queue.size()
    );
}
