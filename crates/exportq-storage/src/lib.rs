//! Storage extension surface for the exporter queue.
//!
//! The persistent queue in `exportq` is backed by a pluggable key/value
//! store. This crate defines the contract that store must satisfy: an
//! object-safe [`StorageClient`] with atomic multi-operation batches, the
//! [`StorageExtension`] capability through which clients are acquired, and
//! the [`Host`] lookup surface that maps component ids to extensions.
//!
//! An [`InMemoryStorage`] backend is included so tests, demos and
//! single-process deployments can run without an external store.

pub mod client;
pub mod memory;

pub use client::{
    ComponentId, ComponentKind, Extension, ExtensionHost, Host, Operation, Signal, StorageClient,
    StorageError, StorageExtension,
};
pub use memory::InMemoryStorage;
