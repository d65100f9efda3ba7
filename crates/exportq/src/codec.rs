//! Item codecs for the persistent queue.
//!
//! The persistent queue stores items as opaque byte buffers; a [`Codec`]
//! pairs the marshal and unmarshal halves. The memory queue never touches
//! a codec.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

/// Marshal/unmarshal failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("marshal error: {0}")]
    Marshal(String),

    #[error("unmarshal error: {0}")]
    Unmarshal(String),
}

/// Turns items into opaque byte buffers and back.
pub trait Codec<T>: Send + Sync {
    fn marshal(&self, item: &T) -> Result<Vec<u8>, CodecError>;
    fn unmarshal(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// Default codec: compact binary encoding of serde types.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec<T> {
    fn marshal(&self, item: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(item).map_err(|e| CodecError::Marshal(e.to_string()))
    }

    fn unmarshal(&self, buf: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(buf).map_err(|e| CodecError::Unmarshal(e.to_string()))
    }
}

/// Human-readable alternative, useful when inspecting a store by hand.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn marshal(&self, item: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(item).map_err(|e| CodecError::Marshal(e.to_string()))
    }

    fn unmarshal(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Unmarshal(e.to_string()))
    }
}
