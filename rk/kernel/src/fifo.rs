//! Blocking FIFO queue.
//!
//! A fixed-capacity ring buffer over caller-supplied storage. Producers
//! block while it is full, consumers while it is empty; every successful
//! transfer wakes exactly one thread waiting on the opposite side. Waiters
//! wake highest priority first and in arrival order within one priority.
//!
//! Every operation comes in four flavours:
//!
//! | flavour | full / empty queue |
//! | --- | --- |
//! | `push` / `pop` | blocks until it can complete |
//! | `try_push` / `try_pop` | fails with [`RkError::WouldBlock`] |
//! | `try_push_for` / `try_pop_for` | blocks, fails with [`RkError::Timeout`] after the duration |
//! | `try_push_until` / `try_pop_until` | blocks, fails with [`RkError::Timeout`] at the deadline |
//!
//! and the `emplace` family constructs the element in its slot instead of
//! moving one in. Timed calls whose deadline is already reached behave like
//! the `try_` call but report `Timeout`. Suspending from interrupt context
//! is a usage error and panics; the `try_` calls work from any context.

use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

use critical_section::Mutex;
use log::trace;
use rk_core::{RkError, RkResult, Tick, TickDuration};

use crate::kernel::Kernel;
use crate::scheduler::WaitListId;

/// Ring buffer state. Slots `read..read + count` (mod capacity) are
/// initialized.
struct Ring<T, S: AsMut<[MaybeUninit<T>]>> {
    storage: S,
    capacity: usize,
    read: usize,
    write: usize,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T, S: AsMut<[MaybeUninit<T>]>> Ring<T, S> {
    fn new(mut storage: S) -> Self {
        let capacity = storage.as_mut().len();
        Self {
            storage,
            capacity,
            read: 0,
            write: 0,
            count: 0,
            _marker: PhantomData,
        }
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, value: T) {
        debug_assert!(!self.is_full());
        self.storage.as_mut()[self.write].write(value);
        self.write = self.next(self.write);
        self.count += 1;
    }

    fn pop(&mut self) -> T {
        debug_assert!(!self.is_empty());
        // SAFETY: `read` is within the initialized span because count > 0;
        // advancing `read` below forgets the slot.
        let value = unsafe { self.storage.as_mut()[self.read].assume_init_read() };
        self.read = self.next(self.read);
        self.count -= 1;
        value
    }

    fn next(&self, index: usize) -> usize {
        if index + 1 == self.capacity {
            0
        } else {
            index + 1
        }
    }
}

impl<T, S: AsMut<[MaybeUninit<T>]>> Drop for Ring<T, S> {
    fn drop(&mut self) {
        while !self.is_empty() {
            drop(self.pop());
        }
    }
}

/// How long an operation may wait.
#[derive(Debug, Clone, Copy)]
enum Wait {
    /// Fail with `WouldBlock` instead of waiting
    Never,
    /// Fail with `Timeout` once the tick counter reaches the deadline
    Until(Tick),
    Forever,
}

/// Outcome of one attempt inside the critical section.
enum Attempt<V, R> {
    Done { value: R, preempt: bool },
    Failed(RkError, V),
    /// The caller must switch away and try again
    Retry(V),
}

/// Error returned by a failed push, carrying the rejected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushError<T> {
    kind: RkError,
    value: T,
}

impl<T> PushError<T> {
    /// Why the push failed: [`RkError::WouldBlock`] or [`RkError::Timeout`]
    pub fn kind(&self) -> RkError {
        self.kind
    }

    /// The value that was not queued
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Takes the value back
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push failed: {}", self.kind)
    }
}

impl<T: fmt::Debug> core::error::Error for PushError<T> {}

impl<T> From<PushError<T>> for RkError {
    fn from(error: PushError<T>) -> Self {
        error.kind
    }
}

/// Blocking FIFO queue of `T` over storage `S`.
///
/// The storage length fixes the capacity. Dropping the queue drops the
/// elements still in it and returns its wait lists to the kernel; no thread
/// may be waiting on it at that point.
pub struct FifoQueue<T, S: AsMut<[MaybeUninit<T>]> = &'static mut [MaybeUninit<T>]> {
    kernel: &'static Kernel,
    ring: Mutex<RefCell<Ring<T, S>>>,
    /// Producers waiting for a free slot
    pushers: WaitListId,
    /// Consumers waiting for an element
    poppers: WaitListId,
}

impl<T, S: AsMut<[MaybeUninit<T>]>> FifoQueue<T, S> {
    /// Creates an empty queue over `storage`.
    ///
    /// Takes two wait lists from the kernel's pool. Panics if `storage` has
    /// no slots.
    pub fn new(kernel: &'static Kernel, storage: S) -> RkResult<Self> {
        let ring = Ring::new(storage);
        assert!(ring.capacity > 0, "FIFO queue storage has no slots");
        let (pushers, poppers) = critical_section::with(|cs| {
            let mut scheduler = kernel.scheduler(cs);
            let pushers = scheduler.allocate_wait_list()?;
            match scheduler.allocate_wait_list() {
                Ok(poppers) => Ok((pushers, poppers)),
                Err(error) => {
                    scheduler.release_wait_list(pushers);
                    Err(error)
                }
            }
        })?;
        trace!("fifo: capacity {} on {pushers:?}/{poppers:?}", ring.capacity);
        Ok(Self {
            kernel,
            ring: Mutex::new(RefCell::new(ring)),
            pushers,
            poppers,
        })
    }

    /// Pushes `value`, blocking while the queue is full.
    pub fn push(&self, value: T) {
        if self.push_with(value, Wait::Forever, Ring::push).is_err() {
            unreachable!("unbounded push gave up");
        }
    }

    /// Pushes `value` if a slot is free.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        self.push_with(value, Wait::Never, Ring::push)
    }

    /// Pushes `value`, waiting at most `duration` for a free slot.
    pub fn try_push_for(&self, duration: TickDuration, value: T) -> Result<(), PushError<T>> {
        self.try_push_until(self.deadline(duration), value)
    }

    /// Pushes `value`, waiting until `deadline` at the latest.
    pub fn try_push_until(&self, deadline: Tick, value: T) -> Result<(), PushError<T>> {
        self.push_with(value, Wait::Until(deadline), Ring::push)
    }

    /// Constructs an element in the next free slot, blocking while the
    /// queue is full.
    ///
    /// `make` runs inside the kernel's critical section and should be short.
    pub fn emplace<F: FnOnce() -> T>(&self, make: F) {
        if self.push_with(make, Wait::Forever, |ring, make| ring.push(make())).is_err() {
            unreachable!("unbounded emplace gave up");
        }
    }

    /// Constructs an element if a slot is free. `make` is dropped unused
    /// otherwise.
    pub fn try_emplace<F: FnOnce() -> T>(&self, make: F) -> RkResult<()> {
        self.emplace_with(make, Wait::Never)
    }

    /// Constructs an element, waiting at most `duration` for a free slot.
    pub fn try_emplace_for<F: FnOnce() -> T>(&self, duration: TickDuration, make: F) -> RkResult<()> {
        self.try_emplace_until(self.deadline(duration), make)
    }

    /// Constructs an element, waiting until `deadline` at the latest.
    pub fn try_emplace_until<F: FnOnce() -> T>(&self, deadline: Tick, make: F) -> RkResult<()> {
        self.emplace_with(make, Wait::Until(deadline))
    }

    /// Pops the oldest element, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        match self.pop_with(Wait::Forever) {
            Ok(value) => value,
            Err(_) => unreachable!("unbounded pop gave up"),
        }
    }

    /// Pops the oldest element if there is one.
    pub fn try_pop(&self) -> RkResult<T> {
        self.pop_with(Wait::Never)
    }

    /// Pops the oldest element, waiting at most `duration` for one.
    pub fn try_pop_for(&self, duration: TickDuration) -> RkResult<T> {
        self.try_pop_until(self.deadline(duration))
    }

    /// Pops the oldest element, waiting until `deadline` at the latest.
    pub fn try_pop_until(&self, deadline: Tick) -> RkResult<T> {
        self.pop_with(Wait::Until(deadline))
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).count)
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).capacity)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the queue is full
    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.ring.borrow_ref(cs).is_full())
    }

    fn deadline(&self, duration: TickDuration) -> Tick {
        duration.deadline_from(self.kernel.tick_count())
    }

    fn emplace_with<F: FnOnce() -> T>(&self, make: F, wait: Wait) -> RkResult<()> {
        self.push_with(make, wait, |ring, make| ring.push(make()))
            .map_err(RkError::from)
    }

    /// Producer side: waits for a free slot, then hands `payload` to
    /// `store`.
    fn push_with<V>(&self, payload: V, wait: Wait, mut store: impl FnMut(&mut Ring<T, S>, V)) -> Result<(), PushError<V>> {
        self.transfer(payload, wait, self.pushers, self.poppers, |ring, payload| {
            if ring.is_full() {
                Err(payload)
            } else {
                store(ring, payload);
                Ok(())
            }
        })
        .map_err(|(kind, value)| PushError { kind, value })
    }

    /// Consumer side: waits for an element and takes it.
    fn pop_with(&self, wait: Wait) -> RkResult<T> {
        self.transfer((), wait, self.poppers, self.pushers, |ring, ()| {
            if ring.is_empty() {
                Err(())
            } else {
                Ok(ring.pop())
            }
        })
        .map_err(|(kind, ())| kind)
    }

    /// Retries `attempt` until it succeeds or `wait` runs out.
    ///
    /// Each round runs in one critical section: attempt the transfer, then
    /// check the deadline, then block on `own` wait list. A successful
    /// transfer wakes one thread on `other`.
    fn transfer<V, R>(
        &self,
        mut payload: V,
        wait: Wait,
        own: WaitListId,
        other: WaitListId,
        mut attempt: impl FnMut(&mut Ring<T, S>, V) -> Result<R, V>,
    ) -> Result<R, (RkError, V)> {
        loop {
            let outcome = critical_section::with(|cs| {
                let mut ring = self.ring.borrow_ref_mut(cs);
                let mut scheduler = self.kernel.scheduler(cs);
                if scheduler.is_started() && !self.kernel.in_interrupt() && !scheduler.current_is_running() {
                    // Suspended from interrupt context; the switch is still pending.
                    return Attempt::Retry(payload);
                }
                let payload = match attempt(&mut *ring, payload) {
                    Ok(value) => {
                        let preempt = scheduler.wake_one(other);
                        return Attempt::Done { value, preempt };
                    }
                    Err(payload) => payload,
                };
                let deadline = match wait {
                    Wait::Never => return Attempt::Failed(RkError::WouldBlock, payload),
                    Wait::Until(deadline) if scheduler.tick_count().has_reached(deadline) => {
                        return Attempt::Failed(RkError::Timeout, payload);
                    }
                    Wait::Until(deadline) => Some(deadline),
                    Wait::Forever => None,
                };
                assert!(!self.kernel.in_interrupt(), "blocking FIFO operation from interrupt context");
                scheduler.block_current(Some(own), deadline);
                Attempt::Retry(payload)
            });

            match outcome {
                Attempt::Done { value, preempt } => {
                    if preempt {
                        self.kernel.request_switch();
                    }
                    return Ok(value);
                }
                Attempt::Failed(kind, payload) => {
                    if kind == RkError::Timeout {
                        trace!("fifo: wait on {own:?} timed out");
                    }
                    return Err((kind, payload));
                }
                Attempt::Retry(returned) => {
                    payload = returned;
                    self.kernel.request_switch();
                }
            }
        }
    }
}

impl<T, S: AsMut<[MaybeUninit<T>]>> Drop for FifoQueue<T, S> {
    fn drop(&mut self) {
        critical_section::with(|cs| {
            let mut scheduler = self.kernel.scheduler(cs);
            scheduler.release_wait_list(self.pushers);
            scheduler.release_wait_list(self.poppers);
        });
    }
}

impl<T, S: AsMut<[MaybeUninit<T>]>> fmt::Debug for FifoQueue<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (count, capacity) = critical_section::with(|cs| {
            let ring = self.ring.borrow_ref(cs);
            (ring.count, ring.capacity)
        });
        f.debug_struct("FifoQueue")
            .field("len", &count)
            .field("capacity", &capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::kernel::tests::test_kernel;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::boxed::Box;
    use std::vec::Vec;

    fn storage<T>(capacity: usize) -> &'static mut [MaybeUninit<T>] {
        Box::leak((0..capacity).map(|_| MaybeUninit::uninit()).collect::<Box<[_]>>())
    }

    fn queue<T>(capacity: usize) -> FifoQueue<T> {
        let (kernel, _) = test_kernel();
        FifoQueue::new(kernel, storage(capacity)).unwrap()
    }

    #[test]
    fn test_capacity_three_scenario() {
        let fifo = queue::<u32>(3);
        for value in 1..=3 {
            fifo.try_push(value).unwrap();
        }
        let error = fifo.try_push(4).unwrap_err();
        assert_eq!(error.kind(), RkError::WouldBlock);
        assert_eq!(error.into_inner(), 4);

        assert_eq!(fifo.try_pop(), Ok(1));
        assert_eq!(fifo.try_pop(), Ok(2));
        assert_eq!(fifo.try_pop(), Ok(3));
        assert_eq!(fifo.try_pop(), Err(RkError::WouldBlock));
    }

    #[test]
    fn test_count_stays_in_bounds() {
        let fifo = queue::<u32>(4);
        let mut model = std::collections::VecDeque::new();
        let mut seed = 0x2545_f491_u32;
        for step in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 == 0 {
                assert_eq!(fifo.try_pop().ok(), model.pop_front());
            } else {
                match fifo.try_push(step) {
                    Ok(()) => model.push_back(step),
                    Err(error) => {
                        assert_eq!(error.kind(), RkError::WouldBlock);
                        assert_eq!(model.len(), 4);
                    }
                }
            }
            assert_eq!(fifo.len(), model.len());
            assert!(fifo.len() <= fifo.capacity());
        }
    }

    #[test]
    fn test_wraps_around_storage() {
        let fifo = queue::<u8>(2);
        for value in 0..10 {
            fifo.try_push(value).unwrap();
            assert_eq!(fifo.try_pop(), Ok(value));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_introspection() {
        let fifo = queue::<u8>(2);
        assert_eq!(fifo.capacity(), 2);
        assert!(fifo.is_empty());
        fifo.try_push(1).unwrap();
        fifo.try_push(2).unwrap();
        assert!(fifo.is_full());
        assert_eq!(fifo.len(), 2);
    }

    #[test]
    fn test_try_emplace_constructs_in_place() {
        let fifo = queue::<Vec<u8>>(1);
        fifo.try_emplace(|| std::vec![1, 2, 3]).unwrap();
        assert_eq!(fifo.try_emplace(|| unreachable!()), Err(RkError::WouldBlock));
        assert_eq!(fifo.try_pop(), Ok(std::vec![1, 2, 3]));
    }

    #[test]
    fn test_timed_calls_with_reached_deadline_do_not_block() {
        let (kernel, _) = test_kernel();
        let fifo = FifoQueue::<u8>::new(kernel, storage(1)).unwrap();
        for _ in 0..3 {
            kernel.tick();
        }

        assert_eq!(fifo.try_pop_until(Tick::new(1)), Err(RkError::Timeout));
        assert_eq!(fifo.try_pop_for(TickDuration::ZERO), Err(RkError::Timeout));
        fifo.try_push_until(Tick::new(1), 7).unwrap();
        let error = fifo.try_push_for(TickDuration::ZERO, 8).unwrap_err();
        assert_eq!(error.kind(), RkError::Timeout);
        assert_eq!(fifo.try_emplace_until(Tick::new(2), || 9), Err(RkError::Timeout));
        assert_eq!(fifo.try_pop_until(Tick::new(0)), Ok(7));
    }

    #[test]
    fn test_try_calls_work_in_interrupt_context() {
        let (kernel, port) = test_kernel();
        port.interrupt.store(true, Ordering::SeqCst);
        let fifo = FifoQueue::<u8>::new(kernel, storage(1)).unwrap();
        fifo.try_push(1).unwrap();
        assert_eq!(fifo.try_push(2).unwrap_err().kind(), RkError::WouldBlock);
        assert_eq!(fifo.try_pop(), Ok(1));
    }

    #[test]
    #[should_panic(expected = "interrupt context")]
    fn test_blocking_pop_from_interrupt_panics() {
        let (kernel, port) = test_kernel();
        port.interrupt.store(true, Ordering::SeqCst);
        let fifo = FifoQueue::<u8>::new(kernel, storage(1)).unwrap();
        fifo.pop();
    }

    #[test]
    fn test_transfer_without_waiters_requests_no_switch() {
        let (kernel, port) = test_kernel();
        let fifo = FifoQueue::<u8>::new(kernel, storage(2)).unwrap();
        fifo.push(1);
        fifo.emplace(|| 2);
        assert_eq!(fifo.pop(), 1);
        assert_eq!(fifo.pop(), 2);
        assert_eq!(port.switches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_suspended_caller_switches_out_before_transferring() {
        use crate::kernel::tests::stack;
        use crate::{Priority, ThreadConfig, ThreadState};

        fn noop(_: usize) {}

        let (kernel, port) = test_kernel();
        let fifo = FifoQueue::<u8>::new(kernel, storage(2)).unwrap();
        let high = kernel.spawn(ThreadConfig::new(Priority::new(6).unwrap(), stack(), noop)).unwrap();
        let low = kernel.spawn(ThreadConfig::new(Priority::new(2).unwrap(), stack(), noop)).unwrap();
        critical_section::with(|cs| kernel.scheduler(cs).start());

        port.interrupt.store(true, Ordering::SeqCst);
        kernel.suspend(high).unwrap();
        port.interrupt.store(false, Ordering::SeqCst);
        let pended = port.switches.load(Ordering::SeqCst);

        port.dispatch.store(true, Ordering::SeqCst);
        fifo.push(4);
        assert_eq!(port.switches.load(Ordering::SeqCst), pended + 1);
        assert_eq!(kernel.current(), low);
        assert_eq!(kernel.thread_state(high), Some(ThreadState::Suspended));
        assert_eq!(fifo.try_pop(), Ok(4));
    }

    #[test]
    fn test_drop_releases_elements_and_wait_lists() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (kernel, _) = test_kernel();
        for _ in 0..crate::MAX_WAIT_LISTS {
            let fifo = FifoQueue::new(kernel, storage(3)).unwrap();
            fifo.try_push(Counted).unwrap();
            fifo.try_push(Counted).unwrap();
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 2 * crate::MAX_WAIT_LISTS);
    }

    #[test]
    fn test_wait_list_exhaustion() {
        let (kernel, _) = test_kernel();
        let queues: Vec<_> = (0..crate::MAX_WAIT_LISTS / 2)
            .map(|_| FifoQueue::<u8>::new(kernel, storage(1)).unwrap())
            .collect();
        assert_eq!(
            FifoQueue::<u8>::new(kernel, storage(1)).err(),
            Some(RkError::NoFreeWaitList)
        );
        drop(queues);
        assert!(FifoQueue::<u8>::new(kernel, storage(1)).is_ok());
    }

    #[test]
    fn test_push_error_display() {
        let fifo = queue::<u8>(1);
        fifo.try_push(1).unwrap();
        let rejected = fifo.try_push(2).unwrap_err();
        assert_eq!(std::format!("{rejected}"), "push failed: operation would block");
        assert_eq!(RkError::from(rejected), RkError::WouldBlock);
    }
}
