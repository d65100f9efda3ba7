//! Error types for queue operations.

use crate::codec::CodecError;
use exportq_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue cannot accept the item without exceeding its capacity.
    #[error("sending queue is full")]
    Full,

    /// The item could not be marshaled or unmarshaled.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The backing store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No extension is registered under the configured storage id.
    #[error("no storage client extension found")]
    NoStorageClient,

    /// The configured extension does not provide storage.
    #[error("requested extension is not a storage extension")]
    WrongExtensionType,

    /// The queue is disabled by configuration.
    #[error("sending queue is disabled")]
    Disabled,
}

impl QueueError {
    /// Returns `true` if the caller may retry later (e.g. `Full`).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Returns `true` if this error indicates the queue is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::NoStorageClient | Self::WrongExtensionType
        )
    }
}

/// Outcome reported by a consumer for a dispatched item.
///
/// `ShutdownInProgress` is not a delivery failure: it tells the queue to
/// keep the item marked dispatched so the next start re-enqueues it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumeError {
    /// Terminal delivery failure; the item is dropped from the queue.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The consumer was interrupted by shutdown before delivering.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl ConsumeError {
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ShutdownInProgress)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("queue size must be positive")]
    NonPositiveQueueSize,

    #[error("number of queue consumers must be positive")]
    NonPositiveConsumers,
}
