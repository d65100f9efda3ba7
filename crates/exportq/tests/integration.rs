use exportq::{
    BincodeCodec, BytesSizer, ByteSized, ConsumeError, ConsumeItem, ConsumeItemBoxed, DynQueue,
    QueueConfig, QueueConsumers, QueueError, QueueSettings, RequestSizer, Sizer, build_queue,
};
use exportq_storage::{ComponentId, Extension, ExtensionHost, InMemoryStorage, Signal};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const STORAGE_ID: &str = "file_storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TestRequest {
    id: u64,
    payload: Vec<u8>,
}

impl TestRequest {
    fn new(id: u64, payload_len: usize) -> Self {
        Self {
            id,
            payload: vec![id as u8; payload_len],
        }
    }
}

impl ByteSized for TestRequest {
    fn byte_size(&self) -> usize {
        self.payload.len()
    }
}

fn settings(sizer: Arc<dyn Sizer<TestRequest>>) -> QueueSettings<TestRequest> {
    QueueSettings {
        owner: ComponentId::new("otlp/primary"),
        signal: Signal::Traces,
        sizer,
        codec: Arc::new(BincodeCodec::new()),
    }
}

fn host_with(storage: &Arc<InMemoryStorage>) -> ExtensionHost {
    ExtensionHost::new().with_extension(
        ComponentId::new(STORAGE_ID),
        Arc::clone(storage) as Arc<dyn Extension>,
    )
}

/// Records everything it consumes, in arrival order.
struct Recorder {
    items: std::sync::Mutex<Vec<TestRequest>>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            items: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn consumed(&self) -> Vec<TestRequest> {
        self.items.lock().unwrap().clone()
    }
}

impl ConsumeItem<TestRequest> for Recorder {
    async fn consume(&self, item: TestRequest) -> Result<(), ConsumeError> {
        self.items.lock().unwrap().push(item);
        Ok(())
    }
}

/// Never returns; the item stays dispatched forever.
struct HangingConsumer;

impl ConsumeItem<TestRequest> for HangingConsumer {
    async fn consume(&self, _item: TestRequest) -> Result<(), ConsumeError> {
        std::future::pending().await
    }
}

async fn wait_for<F: Fn() -> bool>(predicate: F) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_happy_path_memory_queue() {
    let config = QueueConfig::default()
        .with_queue_size(10)
        .with_num_consumers(1);
    config.validate().unwrap();

    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
    let recorder = Arc::new(Recorder::new());
    let consumers = QueueConsumers::new(
        Arc::clone(&queue),
        config.num_consumers,
        Arc::clone(&recorder) as Arc<dyn ConsumeItemBoxed<TestRequest>>,
    );
    consumers.start(&ExtensionHost::new()).await.unwrap();

    let requests: Vec<TestRequest> = (1..=10).map(|id| TestRequest::new(id, 4)).collect();
    for request in &requests {
        queue.offer_boxed(request.clone()).await.unwrap();
    }

    wait_for(|| recorder.consumed().len() == 10).await;
    // Each request was delivered exactly once, in offer order.
    assert_eq!(recorder.consumed(), requests);

    consumers.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_drop_on_full() {
    let config = QueueConfig::default()
        .with_queue_size(0)
        .with_num_consumers(0);

    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
    assert_eq!(
        queue.offer_boxed(TestRequest::new(1, 4)).await,
        Err(QueueError::Full)
    );
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn test_persistence_across_restart() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QueueConfig::default()
        .with_queue_size(100)
        .with_storage(ComponentId::new(STORAGE_ID));

    let requests = [
        TestRequest::new(1, 10),
        TestRequest::new(2, 20),
        TestRequest::new(3, 30),
    ];

    {
        let queue = build_queue(&config, settings(Arc::new(BytesSizer)));
        queue.start_boxed(&host_with(&storage)).await.unwrap();
        for request in &requests {
            queue.offer_boxed(request.clone()).await.unwrap();
        }
        assert_eq!(queue.size(), 60);
        queue.shutdown_boxed().await.unwrap();
    }

    // A new process over the same storage picks up where the old one left
    // off, with the occupancy restored from the shutdown snapshot.
    let queue = build_queue(&config, settings(Arc::new(BytesSizer)));
    queue.start_boxed(&host_with(&storage)).await.unwrap();
    assert_eq!(queue.size(), 60);

    for expected in &requests {
        let (index, item) = queue.read_boxed().await.unwrap();
        assert_eq!(&item, expected);
        queue.on_processing_finished_boxed(index, Ok(())).await;
    }
    assert_eq!(queue.size(), 0);
    queue.shutdown_boxed().await.unwrap();
}

#[tokio::test]
async fn test_kill_with_hanging_consumer_replays_item() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QueueConfig::default()
        .with_num_consumers(1)
        .with_storage(ComponentId::new(STORAGE_ID));
    let original = TestRequest::new(42, 16);

    {
        let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
        let consumers = QueueConsumers::new(
            Arc::clone(&queue),
            1,
            Arc::new(HangingConsumer) as Arc<dyn ConsumeItemBoxed<TestRequest>>,
        );
        consumers.start(&host_with(&storage)).await.unwrap();

        queue.offer_boxed(original.clone()).await.unwrap();
        // The hung consumer has read the item once the occupancy drops.
        wait_for(|| queue.size() == 0).await;
        // Killed: the queue and the hung worker are abandoned without
        // shutdown, leaving the dispatched marker in storage.
    }

    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
    queue.start_boxed(&host_with(&storage)).await.unwrap();

    // Startup recovery moved the in-flight item to the back of the queue.
    assert_eq!(queue.size(), 1);
    let (index, item) = queue.read_boxed().await.unwrap();
    assert_eq!(index, 1);
    assert_eq!(item, original);
    queue.on_processing_finished_boxed(index, Ok(())).await;
    assert_eq!(queue.size(), 0);
    queue.shutdown_boxed().await.unwrap();
}

#[tokio::test]
async fn test_memory_queue_shutdown_is_idempotent() {
    let config = QueueConfig::default().with_queue_size(10);
    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));

    for id in 1..=3 {
        queue.offer_boxed(TestRequest::new(id, 4)).await.unwrap();
    }
    queue.shutdown_boxed().await.unwrap();

    // The stopped flag short-circuits further offers.
    assert_eq!(
        queue.offer_boxed(TestRequest::new(9, 4)).await,
        Err(QueueError::Full)
    );
    // A second shutdown returns without blocking.
    queue.shutdown_boxed().await.unwrap();
}

#[tokio::test]
async fn test_byte_size_drift_tolerance() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QueueConfig::default()
        .with_queue_size(1000)
        .with_storage(ComponentId::new(STORAGE_ID));

    {
        let queue = build_queue(&config, settings(Arc::new(BytesSizer)));
        queue.start_boxed(&host_with(&storage)).await.unwrap();
        // The fifth write lands on the snapshot cadence, so the occupancy
        // survives the kill below.
        for id in 1..=5 {
            queue.offer_boxed(TestRequest::new(id, 10)).await.unwrap();
        }
        assert_eq!(queue.size(), 50);
        // Killed without shutdown.
    }

    let queue = build_queue(&config, settings(Arc::new(BytesSizer)));
    queue.start_boxed(&host_with(&storage)).await.unwrap();
    assert_eq!(queue.size(), 50);

    for _ in 0..5 {
        let (index, _) = queue.read_boxed().await.unwrap();
        assert!(queue.size() >= 0);
        queue.on_processing_finished_boxed(index, Ok(())).await;
    }
    // Fully drained: clamped to exactly zero.
    assert_eq!(queue.size(), 0);
    queue.shutdown_boxed().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_offers_drop_exactly_the_overflow() {
    const CAPACITY: i64 = 8;
    const EXTRA: usize = 5;

    let config = QueueConfig::default()
        .with_queue_size(CAPACITY)
        .with_num_consumers(0);
    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));

    let mut tasks = vec![];
    for id in 0..(CAPACITY as usize + EXTRA) {
        let queue = Arc::clone(&queue);
        tasks.push(tokio::spawn(async move {
            queue.offer_boxed(TestRequest::new(id as u64, 4)).await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(QueueError::Full) => rejected += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(accepted, CAPACITY as usize);
    assert_eq!(rejected, EXTRA);
    assert_eq!(queue.size(), CAPACITY);
}

#[tokio::test]
async fn test_random_payloads_survive_kill_byte_identical() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QueueConfig::default()
        .with_queue_size(100)
        .with_storage(ComponentId::new(STORAGE_ID));

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let requests: Vec<TestRequest> = (0..20)
        .map(|id| {
            let len = rng.gen_range(0..64);
            let payload = (0..len).map(|_| rng.gen::<u8>()).collect();
            TestRequest { id, payload }
        })
        .collect();

    {
        let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
        queue.start_boxed(&host_with(&storage)).await.unwrap();
        for request in &requests {
            queue.offer_boxed(request.clone()).await.unwrap();
        }
        // Killed without shutdown.
    }

    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
    queue.start_boxed(&host_with(&storage)).await.unwrap();
    assert_eq!(queue.size(), 20);

    for expected in &requests {
        let (index, item) = queue.read_boxed().await.unwrap();
        assert_eq!(&item, expected);
        queue.on_processing_finished_boxed(index, Ok(())).await;
    }
    queue.shutdown_boxed().await.unwrap();
}

#[tokio::test]
async fn test_disabled_queue_rejects_all_offers() {
    let config = QueueConfig::disabled();
    config.validate().unwrap();

    let queue = build_queue(&config, settings(Arc::new(RequestSizer)));
    queue.start_boxed(&ExtensionHost::new()).await.unwrap();
    assert_eq!(
        queue.offer_boxed(TestRequest::new(1, 4)).await,
        Err(QueueError::Disabled)
    );
    assert_eq!(queue.size(), 0);
    queue.shutdown_boxed().await.unwrap();
}
