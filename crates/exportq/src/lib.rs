//! Exporter queue subsystem for telemetry pipelines.
//!
//! Sits between producers (receivers and processors emitting telemetry
//! batches) and downstream senders (exporters pushing to remote
//! endpoints). The queue absorbs bursty producer rates, delivers each item
//! to exactly one consumer, and in its persistent variant survives process
//! restarts with bounded loss.
//!
//! Two interchangeable implementations share the [`Queue`] contract:
//!
//! - [`BoundedMemoryQueue`]: fixed capacity, low latency, lossy on
//!   overflow.
//! - [`PersistentQueue`]: backed by a pluggable key/value storage
//!   extension (see `exportq-storage`), durable across restarts, lossy
//!   only under configured capacity pressure.
//!
//! A [`QueueConsumers`] pool drains either variant into a user callback.

pub mod codec;
pub mod config;
pub mod consumers;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod queue;
pub mod shared;
pub mod sizer;

// Re-export main types
pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use config::QueueConfig;
pub use consumers::{ConsumeItem, ConsumeItemBoxed, QueueConsumers};
pub use error::{ConfigError, ConsumeError, QueueError};
pub use memory::BoundedMemoryQueue;
pub use persistent::PersistentQueue;
pub use queue::{build_queue, DisabledQueue, DynQueue, Queue, QueueSettings};
pub use shared::{ComponentStatus, SharedComponent, SharedMap, StatusObserver};
pub use sizer::{ByteSized, BytesSizer, RequestSizer, Sizer};
