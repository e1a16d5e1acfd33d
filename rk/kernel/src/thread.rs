//! Thread control blocks.
//!
//! A [`ThreadControlBlock`] owns one thread's stack and records its
//! priority, lifecycle state and, while blocked, the wait list and deadline
//! it is blocked on. Control blocks live in a fixed arena addressed by
//! [`ThreadId`]; ready and wait lists link them by index.

use core::fmt;

use heapless::Vec;
use rk_core::{Priority, RkError, RkResult, ThreadId, ThreadState, Tick};

use crate::arch::StackPointer;
use crate::list::Link;
use crate::scheduler::WaitListId;
use crate::stack::Stack;
use crate::MAX_THREADS;

/// Body of a thread, called with the argument from its [`ThreadConfig`].
pub type ThreadEntry = fn(usize);

/// Called on the terminating thread after its body returned.
pub type ExitHook = fn(ThreadId);

/// Configuration for creating a thread.
pub struct ThreadConfig {
    /// Thread priority
    pub priority: Priority,
    /// Storage for the thread's stack
    pub stack: &'static mut [u8],
    /// Thread body
    pub entry: ThreadEntry,
    /// Word passed to `entry`
    pub argument: usize,
    /// Runs after `entry` returns, before the thread terminates
    pub exit_hook: Option<ExitHook>,
}

impl ThreadConfig {
    /// Creates a new thread configuration.
    pub fn new(priority: Priority, stack: &'static mut [u8], entry: ThreadEntry) -> Self {
        Self {
            priority,
            stack,
            entry,
            argument: 0,
            exit_hook: None,
        }
    }

    /// Sets the word passed to the thread body.
    pub fn with_argument(mut self, argument: usize) -> Self {
        self.argument = argument;
        self
    }

    /// Sets the hook run after the body returns.
    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = Some(hook);
        self
    }
}

impl fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("priority", &self.priority)
            .field("stack_len", &self.stack.len())
            .field("argument", &self.argument)
            .field("exit_hook", &self.exit_hook.is_some())
            .finish()
    }
}

/// Kernel record of one thread.
#[derive(Debug)]
pub struct ThreadControlBlock {
    id: ThreadId,
    priority: Priority,
    state: ThreadState,
    stack: Stack,
    stack_pointer: StackPointer,
    entry: ThreadEntry,
    argument: usize,
    exit_hook: Option<ExitHook>,
    pub(crate) link: Link,
    pub(crate) wait_list: Option<WaitListId>,
    pub(crate) deadline: Option<Tick>,
    pub(crate) quantum: u32,
}

impl ThreadControlBlock {
    /// Creates a control block in the `Created` state around a built stack.
    pub(crate) fn new(
        id: ThreadId,
        priority: Priority,
        stack: Stack,
        stack_pointer: StackPointer,
        entry: ThreadEntry,
        argument: usize,
        exit_hook: Option<ExitHook>,
    ) -> Self {
        Self {
            id,
            priority,
            state: ThreadState::Created,
            stack,
            stack_pointer,
            entry,
            argument,
            exit_hook,
            link: Link::UNLINKED,
            wait_list: None,
            deadline: None,
            quantum: 0,
        }
    }

    /// Thread handle
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Static priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Current lifecycle state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Saved stack pointer; stale while the thread is `Running`
    pub fn stack_pointer(&self) -> StackPointer {
        self.stack_pointer
    }

    /// The thread's stack
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Wait list the thread is blocked on, if any
    pub fn wait_list(&self) -> Option<WaitListId> {
        self.wait_list
    }

    /// Tick at which a blocked thread times out, if any
    pub fn deadline(&self) -> Option<Tick> {
        self.deadline
    }

    pub(crate) fn entry(&self) -> (ThreadEntry, usize) {
        (self.entry, self.argument)
    }

    pub(crate) fn exit_hook(&self) -> Option<ExitHook> {
        self.exit_hook
    }

    pub(crate) fn save_stack_pointer(&mut self, stack_pointer: StackPointer) {
        self.stack_pointer = stack_pointer;
    }

    /// Moves the thread to `next`.
    ///
    /// Panics on any edge the lifecycle does not allow; in particular a
    /// terminated thread never changes state again.
    pub(crate) fn transition(&mut self, next: ThreadState) {
        assert!(
            self.state != ThreadState::Terminated,
            "{} is terminated and cannot become {next}",
            self.id
        );
        assert!(
            self.state.can_transition_to(next),
            "{}: illegal transition {} -> {next}",
            self.id,
            self.state
        );
        self.state = next;
    }

    pub(crate) fn into_stack(self) -> Stack {
        self.stack
    }
}

/// Fixed-capacity arena of control blocks, indexed by [`ThreadId`].
pub(crate) struct ThreadArena {
    slots: Vec<Option<ThreadControlBlock>, MAX_THREADS>,
}

impl ThreadArena {
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Handle of the first free slot.
    pub(crate) fn vacant(&self) -> RkResult<ThreadId> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Ok(ThreadId::new(index as u8));
        }
        if self.slots.is_full() {
            Err(RkError::NoFreeThreadSlot)
        } else {
            Ok(ThreadId::new(self.slots.len() as u8))
        }
    }

    /// Stores `tcb` in the slot named by its id, which must be vacant.
    pub(crate) fn insert(&mut self, tcb: ThreadControlBlock) -> RkResult<()> {
        let index = tcb.id().index();
        while self.slots.len() <= index {
            self.slots.push(None).map_err(|_| RkError::NoFreeThreadSlot)?;
        }
        assert!(self.slots[index].is_none(), "{} slot already occupied", tcb.id());
        self.slots[index] = Some(tcb);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ThreadId) -> Option<ThreadControlBlock> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<&ThreadControlBlock> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut ThreadControlBlock> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Control block of a thread the kernel knows to be alive.
    pub(crate) fn tcb(&self, id: ThreadId) -> &ThreadControlBlock {
        match self.get(id) {
            Some(tcb) => tcb,
            None => panic!("{id} is not a live thread"),
        }
    }

    pub(crate) fn tcb_mut(&mut self, id: ThreadId) -> &mut ThreadControlBlock {
        match self.get_mut(id) {
            Some(tcb) => tcb,
            None => panic!("{id} is not a live thread"),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ThreadControlBlock> {
        self.slots.iter().flatten()
    }

    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }
}
