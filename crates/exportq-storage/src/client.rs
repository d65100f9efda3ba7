//! Key/value storage client contract and host lookup surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error types for storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Underlying I/O failure in the backing store.
    #[error("storage error: {0}")]
    Io(String),

    /// The client has been closed and accepts no further operations.
    #[error("storage client is closed")]
    Closed,
}

/// Identity of a pipeline component, e.g. `file_storage/primary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The kind of component acquiring a storage client. Part of the client
/// keyspace so that e.g. an exporter and a processor with the same id do
/// not share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Receiver,
    Processor,
    Exporter,
    Extension,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Processor => "processor",
            Self::Exporter => "exporter",
            Self::Extension => "extension",
        }
    }
}

/// Telemetry signal used to namespace a storage client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operation inside a [`StorageClient::batch`] call.
///
/// `Get` operations are filled in place by the client: after a successful
/// batch, `value` holds the stored bytes, or `None` if the key was never
/// set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get { key: String, value: Option<Vec<u8>> },
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Operation {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get {
            key: key.into(),
            value: None,
        }
    }

    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Set {
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Returns the result of a `Get` operation after a batch, if any.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Get { value, .. } => value.as_deref(),
            _ => None,
        }
    }

    /// Consumes the operation and returns the fetched bytes of a `Get`.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Get { value, .. } => value,
            _ => None,
        }
    }
}

/// Key/value client handed out by a storage extension.
///
/// A missing key is not an error: `get` returns `Ok(None)` and a batched
/// `Get` leaves its `value` as `None`. Errors are reserved for I/O level
/// failures of the backing store.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Removes `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Executes all operations with all-or-nothing semantics and fills in
    /// the values of `Get` operations.
    async fn batch(&self, ops: &mut [Operation]) -> Result<(), StorageError>;

    /// Releases the client. Subsequent operations fail with
    /// [`StorageError::Closed`]; the data outlives the client.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Capability exposed by extensions that can hand out storage clients.
///
/// Each `(kind, owner, signal)` triple addresses an isolated keyspace, so
/// the same extension can serve many queues without key collisions.
#[async_trait::async_trait]
pub trait StorageExtension: Send + Sync {
    async fn client(
        &self,
        kind: ComponentKind,
        owner: &ComponentId,
        signal: Signal,
    ) -> Result<Arc<dyn StorageClient>, StorageError>;
}

/// A host-registered extension.
///
/// Capabilities are probed through accessor methods rather than downcasts;
/// an extension that is not a storage provider keeps the default `None`.
pub trait Extension: Send + Sync {
    /// Returns the storage capability of this extension, if it has one.
    fn storage(&self) -> Option<&dyn StorageExtension> {
        None
    }
}

/// The environment a component is started in. Components look up the
/// extensions they were configured with by id.
pub trait Host: Send + Sync {
    fn extensions(&self) -> &HashMap<ComponentId, Arc<dyn Extension>>;
}

/// Minimal [`Host`] over a map of extensions, for tests and demos.
#[derive(Default)]
pub struct ExtensionHost {
    extensions: HashMap<ComponentId, Arc<dyn Extension>>,
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `extension` under `id`, replacing any previous entry.
    pub fn with_extension(mut self, id: ComponentId, extension: Arc<dyn Extension>) -> Self {
        self.extensions.insert(id, extension);
        self
    }
}

impl Host for ExtensionHost {
    fn extensions(&self) -> &HashMap<ComponentId, Arc<dyn Extension>> {
        &self.extensions
    }
}
