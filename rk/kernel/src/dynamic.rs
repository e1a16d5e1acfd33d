//! FIFO queue that owns heap storage.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::MaybeUninit;
use core::ops::Deref;

use rk_core::{RkError, RkResult, Tick, TickDuration};

use crate::fifo::{FifoQueue, PushError};
use crate::kernel::Kernel;

/// Storage type of a [`DynamicFifoQueue`]
pub type HeapStorage<T> = Box<[MaybeUninit<T>]>;

/// [`FifoQueue`] over a heap allocation of `capacity` slots.
///
/// Forwards every queue operation and derefs to the inner queue.
pub struct DynamicFifoQueue<T> {
    queue: FifoQueue<T, HeapStorage<T>>,
}

impl<T> DynamicFifoQueue<T> {
    /// Allocates storage for `capacity` elements and creates the queue.
    ///
    /// Fails with [`RkError::OutOfMemory`] when the allocation fails.
    pub fn new(kernel: &'static Kernel, capacity: usize) -> RkResult<Self> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RkError::OutOfMemory)?;
        storage.resize_with(capacity, MaybeUninit::uninit);
        Ok(Self {
            queue: FifoQueue::new(kernel, storage.into_boxed_slice())?,
        })
    }

    /// See [`FifoQueue::push`].
    pub fn push(&self, value: T) {
        self.queue.push(value)
    }

    /// See [`FifoQueue::try_push`].
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        self.queue.try_push(value)
    }

    /// See [`FifoQueue::try_push_for`].
    pub fn try_push_for(&self, duration: TickDuration, value: T) -> Result<(), PushError<T>> {
        self.queue.try_push_for(duration, value)
    }

    /// See [`FifoQueue::try_push_until`].
    pub fn try_push_until(&self, deadline: Tick, value: T) -> Result<(), PushError<T>> {
        self.queue.try_push_until(deadline, value)
    }

    /// See [`FifoQueue::emplace`].
    pub fn emplace<F: FnOnce() -> T>(&self, make: F) {
        self.queue.emplace(make)
    }

    /// See [`FifoQueue::try_emplace`].
    pub fn try_emplace<F: FnOnce() -> T>(&self, make: F) -> RkResult<()> {
        self.queue.try_emplace(make)
    }

    /// See [`FifoQueue::try_emplace_for`].
    pub fn try_emplace_for<F: FnOnce() -> T>(&self, duration: TickDuration, make: F) -> RkResult<()> {
        self.queue.try_emplace_for(duration, make)
    }

    /// See [`FifoQueue::try_emplace_until`].
    pub fn try_emplace_until<F: FnOnce() -> T>(&self, deadline: Tick, make: F) -> RkResult<()> {
        self.queue.try_emplace_until(deadline, make)
    }

    /// See [`FifoQueue::pop`].
    pub fn pop(&self) -> T {
        self.queue.pop()
    }

    /// See [`FifoQueue::try_pop`].
    pub fn try_pop(&self) -> RkResult<T> {
        self.queue.try_pop()
    }

    /// See [`FifoQueue::try_pop_for`].
    pub fn try_pop_for(&self, duration: TickDuration) -> RkResult<T> {
        self.queue.try_pop_for(duration)
    }

    /// See [`FifoQueue::try_pop_until`].
    pub fn try_pop_until(&self, deadline: Tick) -> RkResult<T> {
        self.queue.try_pop_until(deadline)
    }

    /// The wrapped queue
    pub fn as_queue(&self) -> &FifoQueue<T, HeapStorage<T>> {
        &self.queue
    }
}

impl<T> Deref for DynamicFifoQueue<T> {
    type Target = FifoQueue<T, HeapStorage<T>>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl<T> AsRef<FifoQueue<T, HeapStorage<T>>> for DynamicFifoQueue<T> {
    fn as_ref(&self) -> &FifoQueue<T, HeapStorage<T>> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::test_kernel;

    #[test]
    fn test_owns_requested_capacity() {
        let (kernel, _) = test_kernel();
        let fifo = DynamicFifoQueue::new(kernel, 3).unwrap();
        assert_eq!(fifo.capacity(), 3);
        for value in [10, 20, 30] {
            fifo.try_push(value).unwrap();
        }
        assert_eq!(fifo.try_push(40).unwrap_err().kind(), RkError::WouldBlock);
        assert_eq!(fifo.try_pop(), Ok(10));
        assert_eq!(fifo.as_queue().len(), 2);
    }

    #[test]
    fn test_huge_capacity_is_out_of_memory() {
        let (kernel, _) = test_kernel();
        assert!(matches!(
            DynamicFifoQueue::<u64>::new(kernel, usize::MAX / 4),
            Err(RkError::OutOfMemory)
        ));
    }

    #[test]
    fn test_emplace_forwarding() {
        let (kernel, _) = test_kernel();
        let fifo = DynamicFifoQueue::new(kernel, 1).unwrap();
        fifo.try_emplace(|| 5u8).unwrap();
        assert_eq!(fifo.try_emplace(|| 6), Err(RkError::WouldBlock));
        assert_eq!(fifo.pop(), 5);
    }
}
