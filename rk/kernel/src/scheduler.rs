//! Fixed-priority preemptive scheduler.
//!
//! ## Scheduling Policy
//!
//! 1. The highest non-empty ready list wins; its head runs next
//! 2. Threads of equal priority rotate round-robin: a preempted or yielding
//!    thread re-enters at the tail, and a running thread whose quantum
//!    expires yields to a ready peer
//! 3. Waking a thread of higher priority than the running one requests an
//!    immediate switch
//!
//! The scheduler is plain state. Callers hold the kernel's critical section
//! around every method and talk to the port afterwards.

use heapless::Vec;
use rk_core::{Priority, PriorityMask, RkError, RkResult, ThreadId, ThreadState, Tick, PRIORITY_LEVELS};

use crate::arch::StackPointer;
use crate::list::ThreadList;
use crate::thread::{ThreadArena, ThreadControlBlock};
use crate::{MAX_THREADS, MAX_WAIT_LISTS};

/// Handle of a wait list in the scheduler's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitListId(u8);

impl WaitListId {
    /// Slot index in the pool
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WaitListId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "wait#{}", self.0);
    }
}

/// Ready lists, wait lists, the running thread and the tick counter.
pub struct Scheduler {
    threads: ThreadArena,
    ready: [ThreadList; PRIORITY_LEVELS],
    /// Priorities whose ready list is non-empty
    ready_mask: PriorityMask,
    /// `None` marks a free slot
    wait_lists: Vec<Option<ThreadList>, MAX_WAIT_LISTS>,
    current: Option<ThreadId>,
    now: Tick,
    started: bool,
    quantum: u32,
}

impl Scheduler {
    /// Creates an empty scheduler.
    ///
    /// `quantum` is the number of ticks a thread runs before yielding to a
    /// ready thread of equal priority; zero is treated as one.
    pub const fn new(quantum: u32) -> Self {
        Self {
            threads: ThreadArena::new(),
            ready: [ThreadList::EMPTY; PRIORITY_LEVELS],
            ready_mask: PriorityMask::new(),
            wait_lists: Vec::new(),
            current: None,
            now: Tick::ZERO,
            started: false,
            quantum: if quantum == 0 { 1 } else { quantum },
        }
    }

    /// Handle the next added thread can use.
    pub fn vacant_slot(&self) -> RkResult<ThreadId> {
        self.threads.vacant()
    }

    /// Inserts a new thread as `Ready` at the tail of its priority list.
    pub fn add(&mut self, mut tcb: ThreadControlBlock) -> RkResult<ThreadId> {
        let id = tcb.id();
        tcb.transition(ThreadState::Ready);
        tcb.quantum = self.quantum;
        self.threads.insert(tcb)?;
        self.push_ready(id);
        Ok(id)
    }

    /// The running thread; `None` before [`Scheduler::start`].
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Control block of the running thread.
    pub fn current_tcb(&self) -> Option<&ThreadControlBlock> {
        self.current.map(|id| self.threads.tcb(id))
    }

    /// Control block of any live thread.
    pub fn thread(&self, id: ThreadId) -> Option<&ThreadControlBlock> {
        self.threads.get(id)
    }

    /// Number of threads, terminated but unreaped ones included
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Whether [`Scheduler::start`] ran
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Current value of the tick counter
    pub fn tick_count(&self) -> Tick {
        self.now
    }

    /// Advances the tick counter, wakes threads whose deadline is reached
    /// and charges the running thread's quantum.
    ///
    /// Returns whether a context switch is due. Bounded by `MAX_THREADS`.
    pub fn tick(&mut self) -> bool {
        self.now.increment();
        if !self.started {
            return false;
        }

        let now = self.now;
        let mut switch = false;
        for index in 0..MAX_THREADS {
            let id = ThreadId::new(index as u8);
            let expired = self.threads.get(id).is_some_and(|tcb| {
                tcb.state() == ThreadState::Blocked && tcb.deadline.is_some_and(|deadline| now.has_reached(deadline))
            });
            if expired {
                switch |= self.unblock(id);
            }
        }

        if let Some(id) = self.current {
            let quantum = self.quantum;
            let tcb = self.threads.tcb_mut(id);
            if tcb.state() == ThreadState::Running {
                tcb.quantum = tcb.quantum.saturating_sub(1);
                if tcb.quantum == 0 {
                    tcb.quantum = quantum;
                    let priority = tcb.priority();
                    switch |= !self.ready[priority.index()].is_empty();
                }
            }
        }
        switch
    }

    /// Saves `stack_pointer` into the outgoing thread and returns the saved
    /// stack pointer of the thread chosen to run next.
    ///
    /// An outgoing thread that is still `Running` goes back to the tail of
    /// its ready list; one that blocked, suspended or terminated stays out.
    pub fn switch_context(&mut self, stack_pointer: StackPointer) -> StackPointer {
        assert!(self.started, "context switch before the scheduler started");
        if let Some(id) = self.current {
            let tcb = self.threads.tcb_mut(id);
            tcb.save_stack_pointer(stack_pointer);
            if tcb.state() == ThreadState::Running {
                tcb.transition(ThreadState::Ready);
                self.push_ready(id);
            }
        }
        self.dispatch()
    }

    /// Makes the first scheduling decision and returns the stack pointer to
    /// restore. Panics when called twice.
    pub fn start(&mut self) -> StackPointer {
        assert!(!self.started, "scheduler started twice");
        self.started = true;
        self.dispatch()
    }

    /// Moves the running thread to the tail of its ready list.
    ///
    /// The caller must follow up with a context switch.
    pub fn yield_current(&mut self) {
        let id = self.running();
        self.threads.tcb_mut(id).transition(ThreadState::Ready);
        self.push_ready(id);
    }

    /// Blocks the running thread, optionally on `wait_list` and optionally
    /// until `deadline`. The caller must follow up with a context switch.
    pub fn block_current(&mut self, wait_list: Option<WaitListId>, deadline: Option<Tick>) -> ThreadId {
        let id = self.running();
        let tcb = self.threads.tcb_mut(id);
        tcb.transition(ThreadState::Blocked);
        tcb.deadline = deadline;
        tcb.wait_list = wait_list;
        if let Some(wait_list) = wait_list {
            match self.wait_lists.get_mut(wait_list.index()) {
                Some(Some(list)) => list.insert_by_priority(&mut self.threads, id),
                _ => panic!("{wait_list:?} is not allocated"),
            }
        }
        id
    }

    /// Wakes the first waiter of `wait_list`, if any.
    ///
    /// Returns whether the woken thread should preempt the running one.
    pub fn wake_one(&mut self, wait_list: WaitListId) -> bool {
        match self.list(wait_list).front() {
            Some(id) => self.unblock(id),
            None => false,
        }
    }

    /// Pauses `id`, taking it off whatever list it is on.
    ///
    /// Returns `Ok(true)` when the running thread suspended itself and a
    /// context switch is due.
    pub fn suspend(&mut self, id: ThreadId) -> RkResult<bool> {
        let state = self.threads.get(id).ok_or(RkError::InvalidThread)?.state();
        match state {
            ThreadState::Suspended => return Err(RkError::InvalidState),
            ThreadState::Ready => self.remove_ready(id),
            ThreadState::Blocked => self.leave_wait_list(id),
            _ => {}
        }
        self.threads.tcb_mut(id).transition(ThreadState::Suspended);
        Ok(state == ThreadState::Running)
    }

    /// Makes a suspended thread ready again.
    ///
    /// Returns `Ok(true)` when it should preempt the running thread.
    pub fn resume(&mut self, id: ThreadId) -> RkResult<bool> {
        let tcb = self.threads.get_mut(id).ok_or(RkError::InvalidThread)?;
        match tcb.state() {
            ThreadState::Suspended | ThreadState::Terminated => tcb.transition(ThreadState::Ready),
            _ => return Err(RkError::InvalidState),
        }
        let priority = tcb.priority();
        self.push_ready(id);
        Ok(self.preempts_current(priority))
    }

    /// Marks the running thread `Terminated`. The caller must follow up
    /// with a context switch.
    pub fn terminate_current(&mut self) -> ThreadId {
        let id = self.running();
        self.threads.tcb_mut(id).transition(ThreadState::Terminated);
        id
    }

    /// Removes a terminated thread and hands back its control block.
    pub fn reap(&mut self, id: ThreadId) -> RkResult<ThreadControlBlock> {
        let tcb = self.threads.get(id).ok_or(RkError::InvalidThread)?;
        if tcb.state() != ThreadState::Terminated {
            return Err(RkError::NotTerminated);
        }
        // Still executing on its own stack until the next switch.
        if self.current == Some(id) {
            return Err(RkError::InvalidState);
        }
        self.threads.remove(id).ok_or(RkError::InvalidThread)
    }

    /// Takes a free wait list from the pool.
    pub fn allocate_wait_list(&mut self) -> RkResult<WaitListId> {
        let index = match self.wait_lists.iter().position(Option::is_none) {
            Some(index) => {
                self.wait_lists[index] = Some(ThreadList::EMPTY);
                index
            }
            None => {
                self.wait_lists
                    .push(Some(ThreadList::EMPTY))
                    .map_err(|_| RkError::NoFreeWaitList)?;
                self.wait_lists.len() - 1
            }
        };
        Ok(WaitListId(index as u8))
    }

    /// Returns a wait list to the pool. Nobody may still wait on it.
    pub fn release_wait_list(&mut self, wait_list: WaitListId) {
        debug_assert!(self.list(wait_list).is_empty(), "{wait_list:?} released with waiters");
        self.wait_lists[wait_list.index()] = None;
    }

    /// Threads blocked on `wait_list`, in wake order.
    pub fn waiters(&self, wait_list: WaitListId) -> impl Iterator<Item = ThreadId> + '_ {
        self.list(wait_list).iter(&self.threads)
    }

    #[cfg(test)]
    pub(crate) fn set_tick_count(&mut self, now: Tick) {
        self.now = now;
    }

    /// Whether the current thread is still `Running`. An interrupt may have
    /// suspended it without the port switching it out yet.
    pub fn current_is_running(&self) -> bool {
        self.current
            .is_some_and(|id| self.threads.tcb(id).state() == ThreadState::Running)
    }

    fn running(&self) -> ThreadId {
        match self.current {
            Some(id) if self.threads.tcb(id).state() == ThreadState::Running => id,
            _ => panic!("no thread is running"),
        }
    }

    fn dispatch(&mut self) -> StackPointer {
        let Some(next) = self.pop_highest() else {
            panic!("no thread is ready to run");
        };
        let quantum = self.quantum;
        let tcb = self.threads.tcb_mut(next);
        tcb.transition(ThreadState::Running);
        tcb.quantum = quantum;
        self.current = Some(next);
        tcb.stack_pointer()
    }

    fn unblock(&mut self, id: ThreadId) -> bool {
        self.leave_wait_list(id);
        let tcb = self.threads.tcb_mut(id);
        tcb.transition(ThreadState::Ready);
        let priority = tcb.priority();
        self.push_ready(id);
        self.preempts_current(priority)
    }

    fn leave_wait_list(&mut self, id: ThreadId) {
        let tcb = self.threads.tcb_mut(id);
        tcb.deadline = None;
        if let Some(wait_list) = tcb.wait_list.take() {
            match self.wait_lists.get_mut(wait_list.index()) {
                Some(Some(list)) => list.remove(&mut self.threads, id),
                _ => panic!("{id} waits on released {wait_list:?}"),
            }
        }
    }

    /// Whether a ready thread of `priority` should take the CPU from the
    /// running one.
    pub fn preempts_current(&self, priority: Priority) -> bool {
        match self.current_tcb() {
            Some(tcb) if tcb.state() == ThreadState::Running => priority > tcb.priority(),
            // The current thread already gave up the CPU; a switch is pending.
            Some(_) => true,
            None => false,
        }
    }

    fn push_ready(&mut self, id: ThreadId) {
        let priority = self.threads.tcb(id).priority();
        self.ready[priority.index()].push_back(&mut self.threads, id);
        self.ready_mask.set(priority);
    }

    fn remove_ready(&mut self, id: ThreadId) {
        let priority = self.threads.tcb(id).priority();
        let list = &mut self.ready[priority.index()];
        list.remove(&mut self.threads, id);
        if list.is_empty() {
            self.ready_mask.clear(priority);
        }
    }

    fn pop_highest(&mut self) -> Option<ThreadId> {
        let priority = self.ready_mask.highest()?;
        let list = &mut self.ready[priority.index()];
        let id = list.pop_front(&mut self.threads);
        if list.is_empty() {
            self.ready_mask.clear(priority);
        }
        id
    }

    fn list(&self, wait_list: WaitListId) -> &ThreadList {
        match self.wait_lists.get(wait_list.index()) {
            Some(Some(list)) => list,
            _ => panic!("{wait_list:?} is not allocated"),
        }
    }
}
