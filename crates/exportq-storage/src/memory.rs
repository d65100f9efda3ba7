//! In-memory storage backend.
//!
//! Keeps one keyspace per `(kind, owner, signal)` triple. Data lives in the
//! extension, not the client, so a queue that drops its client and acquires
//! a new one (a restart, in tests) observes the previous contents.

use crate::client::{
    ComponentId, ComponentKind, Extension, Operation, Signal, StorageClient, StorageError,
    StorageExtension,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A storage extension backed by process memory.
#[derive(Default)]
pub struct InMemoryStorage {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
}

#[derive(Default)]
struct Bucket {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, kind: ComponentKind, owner: &ComponentId, signal: Signal) -> Arc<Bucket> {
        let key = format!("{}/{}/{}", kind.as_str(), owner, signal);
        let mut buckets = self.buckets.lock().unwrap();
        Arc::clone(buckets.entry(key).or_default())
    }
}

impl Extension for InMemoryStorage {
    fn storage(&self) -> Option<&dyn StorageExtension> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl StorageExtension for InMemoryStorage {
    async fn client(
        &self,
        kind: ComponentKind,
        owner: &ComponentId,
        signal: Signal,
    ) -> Result<Arc<dyn StorageClient>, StorageError> {
        Ok(Arc::new(InMemoryClient {
            bucket: self.bucket(kind, owner, signal),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryClient {
    bucket: Arc<Bucket>,
    closed: AtomicBool,
}

impl InMemoryClient {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for InMemoryClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_open()?;
        Ok(self.bucket.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check_open()?;
        self.bucket.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_open()?;
        self.bucket.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn batch(&self, ops: &mut [Operation]) -> Result<(), StorageError> {
        self.check_open()?;
        // A single lock over the whole batch gives the all-or-nothing
        // contract: no other client observes a partially applied batch.
        let mut data = self.bucket.data.lock().unwrap();
        for op in ops.iter_mut() {
            match op {
                Operation::Get { key, value } => {
                    *value = data.get(key.as_str()).cloned();
                }
                Operation::Set { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                Operation::Delete { key } => {
                    data.remove(key.as_str());
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> ComponentId {
        ComponentId::new("otlp/primary")
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let storage = InMemoryStorage::new();
        let client = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Traces)
            .await
            .unwrap();

        assert_eq!(client.get("k").await.unwrap(), None);
        client.set("k", vec![1, 2]).await.unwrap();
        assert_eq!(client.get("k").await.unwrap(), Some(vec![1, 2]));
        client.delete("k").await.unwrap();
        assert_eq!(client.get("k").await.unwrap(), None);

        // Deleting a missing key succeeds.
        client.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_fills_gets() {
        let storage = InMemoryStorage::new();
        let client = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Traces)
            .await
            .unwrap();

        client.set("a", vec![1]).await.unwrap();

        let mut ops = [
            Operation::get("a"),
            Operation::set("b", vec![2]),
            Operation::get("missing"),
        ];
        client.batch(&mut ops).await.unwrap();

        assert_eq!(ops[0].value(), Some(&[1u8][..]));
        assert_eq!(ops[2].value(), None);
        assert_eq!(client.get("b").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_data_survives_client_close() {
        let storage = InMemoryStorage::new();
        let client = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Traces)
            .await
            .unwrap();
        client.set("k", vec![7]).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.get("k").await, Err(StorageError::Closed));

        let reopened = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Traces)
            .await
            .unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(vec![7]));
    }

    #[tokio::test]
    async fn test_keyspaces_are_isolated() {
        let storage = InMemoryStorage::new();
        let traces = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Traces)
            .await
            .unwrap();
        let logs = storage
            .client(ComponentKind::Exporter, &owner(), Signal::Logs)
            .await
            .unwrap();

        traces.set("k", vec![1]).await.unwrap();
        assert_eq!(logs.get("k").await.unwrap(), None);
    }
}
