use std::sync::Arc;

use crate::error::RuntimeError;
use crate::runtime::{ManagedRuntime, ManagedThread};

/// A subscriber's reusable managed array and its capacity.
///
/// The array is shared between the registry and in-flight dispatches, and
/// released when the last of them drops it.
pub struct SubscriberBuffer<R: ManagedRuntime> {
    array: Arc<R::Buffer>,
    capacity: usize,
}

impl<R: ManagedRuntime> Clone for SubscriberBuffer<R> {
    fn clone(&self) -> Self {
        Self {
            array: Arc::clone(&self.array),
            capacity: self.capacity,
        }
    }
}

impl<R: ManagedRuntime> SubscriberBuffer<R> {
    pub fn new(array: R::Buffer, capacity: usize) -> Self {
        Self {
            array: Arc::new(array),
            capacity,
        }
    }

    /// Allocate a fresh array of `capacity` bytes.
    pub fn allocate<T>(thread: &mut T, capacity: usize) -> Result<Self, RuntimeError>
    where
        T: ManagedThread<R> + ?Sized,
    {
        Ok(Self::new(thread.new_buffer(capacity)?, capacity))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn array(&self) -> &R::Buffer {
        &self.array
    }

    /// True if both refer to the same managed array.
    pub fn same_array(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.array, &other.array)
    }

    /// Capacity to grow to before holding a `size`-byte message, if any.
    ///
    /// Growth is capped at `max`; buffers never shrink.
    pub fn growth_target(&self, size: usize, max: Option<usize>) -> Option<usize> {
        let target = max.map_or(size, |max| size.min(max));
        (target > self.capacity).then_some(target)
    }

    /// Bytes of a `size`-byte message that fit.
    pub fn copy_len(&self, size: usize) -> usize {
        size.min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalRuntime;

    fn buffer(capacity: usize) -> (LocalRuntime, SubscriberBuffer<LocalRuntime>) {
        let runtime = LocalRuntime::new();
        let mut thread = runtime.attach_current_thread().unwrap();
        let buffer = SubscriberBuffer::allocate(&mut thread, capacity).unwrap();
        drop(thread);
        (runtime, buffer)
    }

    #[test]
    fn grows_only_past_capacity() {
        let (_runtime, buffer) = buffer(1024);
        assert_eq!(buffer.growth_target(64, None), None);
        assert_eq!(buffer.growth_target(1024, None), None);
        assert_eq!(buffer.growth_target(2048, None), Some(2048));
    }

    #[test]
    fn growth_respects_cap() {
        let (_runtime, buffer) = buffer(1024);
        assert_eq!(buffer.growth_target(5000, Some(4096)), Some(4096));
        assert_eq!(buffer.growth_target(5000, Some(512)), None);
        assert_eq!(buffer.copy_len(5000), 1024);
        assert_eq!(buffer.copy_len(10), 10);
    }

    #[test]
    fn clones_share_the_array() {
        let (runtime, buffer) = buffer(8);
        let copy = buffer.clone();
        assert!(buffer.same_array(&copy));
        assert_eq!(runtime.live_refs(), 1);

        let (_other_runtime, other) = self::buffer(8);
        assert!(!buffer.same_array(&other));
    }
}
