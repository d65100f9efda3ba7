//! Occupancy sizing for queue items.

/// Assigns an occupancy cost to an item. The queue capacity is expressed in
/// the same unit, so swapping the sizer changes what `queue_size` means.
pub trait Sizer<T>: Send + Sync {
    /// Cost of holding `item` in the queue. Deterministic for a given item.
    fn size_of(&self, item: &T) -> i64;

    /// Returns `true` if every item costs exactly one request. Request
    /// sized queues can reconstruct their occupancy from the read/write
    /// indices alone and skip size snapshots.
    fn is_request_based(&self) -> bool {
        false
    }
}

/// Sizes every item as one request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestSizer;

impl<T> Sizer<T> for RequestSizer {
    fn size_of(&self, _item: &T) -> i64 {
        1
    }

    fn is_request_based(&self) -> bool {
        true
    }
}

/// Items that can report their payload size in bytes.
pub trait ByteSized {
    fn byte_size(&self) -> usize;
}

/// Sizes items by their payload byte count.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSizer;

impl<T: ByteSized> Sizer<T> for BytesSizer {
    fn size_of(&self, item: &T) -> i64 {
        item.byte_size() as i64
    }
}
