//! Storage-backed persistent queue.
//!
//! The queue is a logical circular log over a key/value store. Two
//! monotonically increasing indices frame the live region: `wi` is the
//! position the next offered item is stored at, `ri` is the position the
//! next read starts from, and `wi == ri` means the queue is empty. Items
//! handed to consumers are not deleted until processing finishes; their
//! indices are tracked in a dispatched list persisted under its own key,
//! which is how a restart finds the items that were in flight when the
//! process died and moves them to the back of the queue.
//!
//! All state transitions commit to storage before mutating memory, so a
//! crash between any two operations leaves the persisted indices
//! consistent with some prefix of the operation history.

use crate::codec::Codec;
use crate::error::{ConsumeError, QueueError};
use crate::queue::{Queue, QueueSettings};
use crate::sizer::Sizer;
use exportq_storage::{
    ComponentId, ComponentKind, Host, Operation, Signal, StorageClient, StorageError,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

const READ_INDEX_KEY: &str = "ri";
const WRITE_INDEX_KEY: &str = "wi";
const DISPATCHED_ITEMS_KEY: &str = "di";
const QUEUE_SIZE_KEY: &str = "si";

/// Decode failures for persisted control values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
enum ValueError {
    /// The key was never written. Expected on first start.
    #[error("value not set")]
    NotSet,

    /// The stored bytes are corrupt.
    #[error("invalid value")]
    Invalid,
}

/// State guarded by the queue mutex. Storage calls are made while the
/// mutex is held so the persisted indices never race the in-memory copy.
struct State {
    client: Option<Arc<dyn StorageClient>>,
    read_index: u64,
    write_index: u64,
    /// Indices handed to consumers but not yet finalised.
    dispatched: Vec<u64>,
    /// Live users of the storage client: 1 for the queue itself plus one
    /// per in-flight item. The last unref closes the client.
    ref_count: i64,
    stopped: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            client: None,
            read_index: 0,
            write_index: 0,
            dispatched: Vec::new(),
            ref_count: 0,
            stopped: false,
        }
    }
}

/// Queue that survives process restarts by keeping items and its indices
/// in a storage extension.
pub struct PersistentQueue<T> {
    storage_id: ComponentId,
    owner: ComponentId,
    signal: Signal,
    capacity: i64,
    sizer: Arc<dyn Sizer<T>>,
    codec: Arc<dyn Codec<T>>,
    is_request_sized: bool,

    state: Mutex<State>,
    /// Occupancy in sizer units. Written only while `state` is held;
    /// read lock-free by `size()`.
    queue_size: AtomicI64,
    /// Times the occupancy was clamped at zero after a restart left the
    /// restored figure out of sync with the actual contents.
    drift_corrections: AtomicU64,
    /// Signalled once per offer, broadcast on shutdown.
    has_elements: Notify,
}

impl<T: Send + Sync + 'static> PersistentQueue<T> {
    pub fn new(storage_id: ComponentId, capacity: i64, settings: QueueSettings<T>) -> Self {
        let is_request_sized = settings.sizer.is_request_based();
        Self {
            storage_id,
            owner: settings.owner,
            signal: settings.signal,
            capacity,
            sizer: settings.sizer,
            codec: settings.codec,
            is_request_sized,
            state: Mutex::new(State::default()),
            queue_size: AtomicI64::new(0),
            drift_corrections: AtomicU64::new(0),
            has_elements: Notify::new(),
        }
    }

    /// Number of times the occupancy underflowed and was clamped to zero.
    pub fn drift_corrections(&self) -> u64 {
        self.drift_corrections.load(Ordering::Relaxed)
    }

    /// Restores `ri`/`wi` from storage. Missing or corrupt values reset
    /// both to zero; this never fails startup.
    async fn init_indices(&self, state: &mut State, client: &Arc<dyn StorageClient>) {
        let mut ops = [
            Operation::get(READ_INDEX_KEY),
            Operation::get(WRITE_INDEX_KEY),
        ];
        match client.batch(&mut ops).await {
            Ok(()) => {
                match (decode_index(ops[0].value()), decode_index(ops[1].value())) {
                    (Ok(read_index), Ok(write_index)) => {
                        state.read_index = read_index;
                        state.write_index = write_index;
                    }
                    (Err(ValueError::NotSet), _) | (_, Err(ValueError::NotSet)) => {
                        info!("Initializing new persistent queue");
                        state.read_index = 0;
                        state.write_index = 0;
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        error!("Failed getting read/write index, starting with new ones: {err}");
                        state.read_index = 0;
                        state.write_index = 0;
                    }
                }
            }
            Err(err) => {
                error!("Failed getting read/write index, starting with new ones: {err}");
                state.read_index = 0;
                state.write_index = 0;
            }
        }

        let mut queue_size = state.write_index.saturating_sub(state.read_index);
        // A request sized queue is fully described by the indices. A byte
        // sized queue needs the last snapshot; without one the index
        // difference stands in as an approximation.
        if queue_size > 0 && !self.is_request_sized {
            if let Some(restored) = self.restore_queue_size(client).await {
                queue_size = restored;
            }
        }
        self.queue_size.store(queue_size as i64, Ordering::Release);
    }

    async fn restore_queue_size(&self, client: &Arc<dyn StorageClient>) -> Option<u64> {
        match client.get(QUEUE_SIZE_KEY).await {
            Ok(value) => match decode_index(value.as_deref()) {
                Ok(size) => return Some(size),
                Err(ValueError::NotSet) => warn!(
                    "Cannot read the queue size snapshot from storage. The reported queue size \
                     will be inaccurate until the queue is drained. Expected when a byte sized \
                     queue is enabled for the first time"
                ),
                Err(err) => error!(
                    "Failed to read the queue size snapshot from storage. The reported queue \
                     size will be inaccurate until the queue is drained: {err}"
                ),
            },
            Err(err) => error!(
                "Failed to read the queue size snapshot from storage. The reported queue size \
                 will be inaccurate until the queue is drained: {err}"
            ),
        }
        None
    }

    /// Re-enqueues the items that consumers held when the previous process
    /// died, then deletes their original slots.
    async fn recover_dispatched(&self, state: &mut State, client: &Arc<dyn StorageClient>) {
        debug!("Checking if there are items left for dispatch by consumers");
        let dispatched = match client.get(DISPATCHED_ITEMS_KEY).await {
            Ok(buf) => match decode_index_array(buf.as_deref()) {
                Ok(items) => items,
                Err(err) => {
                    error!("Could not fetch items left for dispatch by consumers: {err}");
                    return;
                }
            },
            Err(err) => {
                error!("Could not fetch items left for dispatch by consumers: {err}");
                return;
            }
        };

        if dispatched.is_empty() {
            debug!("No items left for dispatch by consumers");
            return;
        }
        info!(
            "Fetching {} items left for dispatch by consumers",
            dispatched.len()
        );

        let mut retrieve: Vec<Operation> = dispatched
            .iter()
            .map(|index| Operation::get(slot_key(*index)))
            .collect();
        let mut cleanup: Vec<Operation> = dispatched
            .iter()
            .map(|index| Operation::delete(slot_key(*index)))
            .collect();
        let retrieve_result = client.batch(&mut retrieve).await;
        let cleanup_result = client.batch(&mut cleanup).await;

        if let Err(err) = cleanup_result {
            debug!("Failed cleaning items left by consumers: {err}");
        }
        if let Err(err) = retrieve_result {
            warn!("Failed retrieving items left by consumers: {err}");
            return;
        }

        let total = retrieve.len();
        let mut error_count = 0;
        for op in retrieve {
            let Operation::Get { key, value } = op else {
                continue;
            };
            let Some(buf) = value else {
                warn!("Failed retrieving item {key}: value not set");
                continue;
            };
            let item = match self.codec.unmarshal(&buf) {
                Ok(item) => item,
                Err(err) => {
                    warn!("Failed unmarshalling item {key}: {err}");
                    continue;
                }
            };
            if self.put_internal(state, client, &item).await.is_err() {
                error_count += 1;
            }
        }

        if error_count > 0 {
            error!(
                "Errors occurred while moving {total} items for dispatching back to queue \
                 ({error_count} failed)"
            );
        } else {
            info!("Moved {total} items for dispatching back to queue");
        }
    }

    /// Inserts an item at the write index. Caller must hold the mutex.
    /// The storage batch commits the new `wi` and the payload atomically
    /// before the in-memory state moves.
    async fn put_internal(
        &self,
        state: &mut State,
        client: &Arc<dyn StorageClient>,
        item: &T,
    ) -> Result<(), QueueError> {
        let req_size = self.sizer.size_of(item);
        if self.queue_size.load(Ordering::Acquire) + req_size > self.capacity {
            return Err(QueueError::Full);
        }

        let payload = self.codec.marshal(item)?;
        let mut ops = [
            Operation::set(WRITE_INDEX_KEY, encode_index(state.write_index + 1)),
            Operation::set(slot_key(state.write_index), payload),
        ];
        client.batch(&mut ops).await?;

        state.write_index += 1;
        self.queue_size.fetch_add(req_size, Ordering::AcqRel);
        self.has_elements.notify_one();

        // Snapshot the occupancy every 10th write so a kill loses at most
        // a bounded window. Offset against the read-side cadence.
        if state.write_index % 10 == 5 {
            if let Err(err) = self.backup_queue_size(client).await {
                error!("Error writing queue size to storage: {err}");
            }
        }

        Ok(())
    }

    /// Pulls the item at the read index, marks it dispatched and pins the
    /// storage client for the in-flight consumer. Returns `None` when the
    /// item could not be fetched or decoded; the slot is cleaned up and
    /// the caller retries with the next index.
    async fn get_next_item(&self, state: &mut State) -> Option<(u64, T)> {
        let Some(client) = state.client.clone() else {
            return None;
        };

        let index = state.read_index;
        // Advance first so a failure below still moves past the bad slot.
        state.read_index += 1;
        state.dispatched.push(index);

        let mut ops = [
            Operation::set(READ_INDEX_KEY, encode_index(state.read_index)),
            Operation::set(DISPATCHED_ITEMS_KEY, encode_index_array(&state.dispatched)),
            Operation::get(slot_key(index)),
        ];
        let item: Result<T, QueueError> = match client.batch(&mut ops).await {
            Ok(()) => match ops[2].value() {
                Some(buf) => self.codec.unmarshal(buf).map_err(QueueError::from),
                None => Err(QueueError::Codec(crate::codec::CodecError::Unmarshal(
                    "value not set".to_string(),
                ))),
            },
            Err(err) => Err(err.into()),
        };

        match item {
            Ok(item) => {
                state.ref_count += 1;
                Some((index, item))
            }
            Err(err) => {
                debug!("Failed to dispatch item: {err}");
                if let Err(err) = self.item_dispatching_finish(state, &client, index).await {
                    error!("Error deleting item from queue: {err}");
                }
                None
            }
        }
    }

    /// Removes `index` from the dispatched list and deletes its slot.
    /// Degrades in steps when storage misbehaves: combined batch first,
    /// then delete alone, then the list update alone. The in-memory list
    /// stays authoritative; stale persisted entries are discarded by the
    /// startup scan.
    async fn item_dispatching_finish(
        &self,
        state: &mut State,
        client: &Arc<dyn StorageClient>,
        index: u64,
    ) -> Result<(), StorageError> {
        if let Some(position) = state.dispatched.iter().position(|&i| i == index) {
            state.dispatched.swap_remove(position);
        }

        let set_op = Operation::set(DISPATCHED_ITEMS_KEY, encode_index_array(&state.dispatched));
        let delete_op = Operation::delete(slot_key(index));

        let mut ops = [set_op.clone(), delete_op.clone()];
        match client.batch(&mut ops).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!("Failed updating currently dispatched items, trying to delete the item first: {err}");
            }
        }

        let mut ops = [delete_op];
        client.batch(&mut ops).await?;

        let mut ops = [set_op];
        if let Err(err) = client.batch(&mut ops).await {
            // The in-memory list stays authoritative; the stale persisted
            // entry is discarded by the next startup scan.
            warn!("Failed updating currently dispatched items after deleting the item: {err}");
        }

        Ok(())
    }

    /// Persists the occupancy snapshot. Skipped for request sized queues,
    /// whose occupancy is the index difference.
    async fn backup_queue_size(
        &self,
        client: &Arc<dyn StorageClient>,
    ) -> Result<(), StorageError> {
        if self.is_request_sized {
            return Ok(());
        }
        let queue_size = self.queue_size.load(Ordering::Acquire).max(0) as u64;
        client.set(QUEUE_SIZE_KEY, encode_index(queue_size)).await
    }

    /// Drops one client reference; the last reference closes the client.
    /// Caller must hold the mutex.
    async fn unref_client(
        state: &mut State,
        client: &Arc<dyn StorageClient>,
    ) -> Result<(), StorageError> {
        state.ref_count -= 1;
        if state.ref_count == 0 {
            return client.close().await;
        }
        Ok(())
    }
}

impl<T: Send + Sync + 'static> Queue<T> for PersistentQueue<T> {
    async fn start(&self, host: &dyn Host) -> Result<(), QueueError> {
        let extension = host
            .extensions()
            .get(&self.storage_id)
            .ok_or(QueueError::NoStorageClient)?;
        let storage = extension.storage().ok_or(QueueError::WrongExtensionType)?;
        let client = storage
            .client(ComponentKind::Exporter, &self.owner, self.signal)
            .await?;

        let mut state = self.state.lock().await;
        state.client = Some(Arc::clone(&client));
        state.ref_count = 1;
        self.init_indices(&mut state, &client).await;
        self.recover_dispatched(&mut state, &client).await;
        Ok(())
    }

    async fn offer(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(client) = state.client.clone() else {
            return Err(QueueError::NoStorageClient);
        };
        self.put_internal(&mut state, &client, &item).await
    }

    async fn read(&self) -> Option<(u64, T)> {
        loop {
            let notified = self.has_elements.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking state, so a signal
            // sent between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if state.stopped {
                    return None;
                }
                if state.read_index != state.write_index {
                    match self.get_next_item(&mut state).await {
                        Some((index, item)) => {
                            let req_size = self.sizer.size_of(&item);
                            let remaining =
                                self.queue_size.fetch_sub(req_size, Ordering::AcqRel) - req_size;
                            // The restored occupancy is approximate after a
                            // kill; never let the figure go negative.
                            if remaining < 0 {
                                self.queue_size.store(0, Ordering::Release);
                                self.drift_corrections.fetch_add(1, Ordering::Relaxed);
                            }
                            return Some((index, item));
                        }
                        // Bad slot, retry with the next index.
                        None => continue,
                    }
                }
            }
            notified.as_mut().await;
        }
    }

    async fn on_processing_finished(&self, index: u64, outcome: Result<(), ConsumeError>) {
        let mut state = self.state.lock().await;
        let Some(client) = state.client.clone() else {
            return;
        };
        // A repeated call for an already finalised index must not touch
        // storage or drop another client reference.
        if !state.dispatched.contains(&index) {
            return;
        }

        if matches!(outcome, Err(ConsumeError::ShutdownInProgress)) {
            // Keep the dispatched marker so the next start re-enqueues the
            // item instead of losing it.
            if let Err(err) = Self::unref_client(&mut state, &client).await {
                error!("Error closing the storage client: {err}");
            }
            return;
        }

        if let Err(err) = self.item_dispatching_finish(&mut state, &client, index).await {
            error!("Error deleting item from queue: {err}");
        }

        if state.read_index % 10 == 0 {
            if let Err(err) = self.backup_queue_size(&client).await {
                error!("Error writing queue size to storage: {err}");
            }
        }

        // With nothing left between the indices any residual drift in the
        // occupancy figure is exactly that: drift. Reset it.
        if state.read_index == state.write_index {
            self.queue_size.store(0, Ordering::Release);
        }

        if let Err(err) = Self::unref_client(&mut state, &client).await {
            error!("Error closing the storage client: {err}");
        }
    }

    fn size(&self) -> i64 {
        self.queue_size.load(Ordering::Acquire)
    }

    fn capacity(&self) -> i64 {
        self.capacity
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        // Nothing to do if the queue was never started or already stopped.
        let Some(client) = state.client.clone() else {
            return Ok(());
        };
        if state.stopped {
            return Ok(());
        }

        let backup_result = self.backup_queue_size(&client).await;
        state.stopped = true;
        self.has_elements.notify_waiters();
        let unref_result = Self::unref_client(&mut state, &client).await;
        backup_result?;
        unref_result?;
        Ok(())
    }
}

fn slot_key(index: u64) -> String {
    index.to_string()
}

fn encode_index(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn decode_index(buf: Option<&[u8]>) -> Result<u64, ValueError> {
    let buf = buf.ok_or(ValueError::NotSet)?;
    if buf.len() < 8 {
        return Err(ValueError::Invalid);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    Ok(u64::from_le_bytes(bytes))
}

fn encode_index_array(indices: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + indices.len() * 8);
    buf.extend_from_slice(&(indices.len() as u32).to_le_bytes());
    for index in indices {
        buf.extend_from_slice(&index.to_le_bytes());
    }
    buf
}

fn decode_index_array(buf: Option<&[u8]>) -> Result<Vec<u64>, ValueError> {
    let buf = buf.unwrap_or_default();
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    if buf.len() < 4 {
        return Err(ValueError::Invalid);
    }
    let mut size_bytes = [0u8; 4];
    size_bytes.copy_from_slice(&buf[..4]);
    let size = u32::from_le_bytes(size_bytes) as usize;
    if size == 0 {
        return Ok(Vec::new());
    }

    let body = &buf[4..];
    if body.len() < size * 8 {
        return Err(ValueError::Invalid);
    }
    let mut indices = Vec::with_capacity(size);
    for chunk in body.chunks_exact(8).take(size) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        indices.push(u64::from_le_bytes(bytes));
    }
    Ok(indices)
}
