//! Single-core simulation on OS threads.
//!
//! Every kernel thread is carried by its own OS thread and a baton decides
//! which of them owns the simulated CPU. A context switch hands the baton
//! to the thread whose stack pointer the kernel returns, then waits until
//! it comes back. A new context is started by decoding the initial frame
//! the stack builder wrote and calling its program counter with `r0..r3`,
//! so the thread body runs on the OS thread's stack rather than the
//! supplied storage.
//!
//! OS threads that carry no kernel thread play the part of interrupt
//! handlers. Switches they request stay pending until the running thread
//! reaches a preemption point: any kernel call that switches, the idle
//! loop, or an explicit [`PosixPort::preemption_point`].

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use rk_kernel::arch::{StackFrame, StackPointer};
use rk_kernel::{Kernel, Port, ThreadState};

/// How long the idle thread sleeps when nothing is pending
const IDLE_POLL: Duration = Duration::from_micros(200);

type Restore = extern "C" fn(usize, usize, usize, usize) -> !;

thread_local! {
    /// Initial stack pointer of the kernel thread carried by this OS thread
    static CONTEXT: Cell<Option<StackPointer>> = const { Cell::new(None) };
}

#[derive(Debug, Default)]
struct CpuState {
    running: Option<StackPointer>,
    contexts: BTreeSet<StackPointer>,
    pending: bool,
}

#[derive(Debug, Default)]
struct Cpu {
    state: Mutex<CpuState>,
    baton: Condvar,
}

impl Cpu {
    fn state(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands the CPU to `next`, giving it an OS thread on first use.
    fn dispatch(self: &Arc<Self>, state: &mut CpuState, next: StackPointer) {
        if state.contexts.insert(next) {
            spawn_context(Arc::clone(self), next);
        }
        state.running = Some(next);
        self.baton.notify_all();
    }

    fn wait_for<'a>(&self, state: MutexGuard<'a, CpuState>, context: StackPointer) -> MutexGuard<'a, CpuState> {
        self.baton
            .wait_while(state, |state| state.running != Some(context))
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`Port`] that simulates one core with OS threads.
#[derive(Debug, Default)]
pub struct PosixPort {
    cpu: Arc<Cpu>,
}

impl PosixPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick interrupt: advances the kernel clock and pends a switch when
    /// the kernel asks for one.
    pub fn tick(&self, kernel: &Kernel) {
        if kernel.tick() {
            self.request_context_switch(kernel);
        }
    }

    /// Takes a pending switch if called from the running kernel thread.
    pub fn preemption_point(&self, kernel: &Kernel) {
        let Some(me) = CONTEXT.get() else {
            return;
        };
        let pending = std::mem::take(&mut self.cpu.state().pending);
        if pending {
            self.switch_from(kernel, me);
        }
    }

    /// Whether a switch requested from outside the kernel threads is waiting
    pub fn is_pending(&self) -> bool {
        self.cpu.state().pending
    }

    fn switch_from(&self, kernel: &Kernel, me: StackPointer) {
        let retiring = kernel.thread_state(kernel.current()) == Some(ThreadState::Terminated);
        let next = kernel.switch_context(me);

        let mut state = self.cpu.state();
        state.pending = false;
        if retiring {
            // The stack may be reaped and reused, so the context is forgotten.
            state.contexts.remove(&me);
            self.cpu.dispatch(&mut state, next);
            drop(state);
            trace!("{me} retired, {next} running");
            park_forever();
        }
        if next == me {
            return;
        }

        trace!("{me} -> {next}");
        self.cpu.dispatch(&mut state, next);
        drop(self.cpu.wait_for(state, me));
    }
}

impl Port for PosixPort {
    fn request_context_switch(&self, kernel: &Kernel) {
        match CONTEXT.get() {
            Some(me) => self.switch_from(kernel, me),
            None => {
                self.cpu.state().pending = true;
                self.cpu.baton.notify_all();
            }
        }
    }

    fn in_interrupt(&self) -> bool {
        CONTEXT.get().is_none()
    }

    fn start_first_thread(&self, kernel: &Kernel, stack_pointer: StackPointer) -> ! {
        debug!("{}: simulated CPU starts at {stack_pointer}", kernel.config().name);
        let mut state = self.cpu.state();
        self.cpu.dispatch(&mut state, stack_pointer);
        drop(state);
        park_forever()
    }

    fn idle(&self, kernel: &Kernel) {
        let Some(me) = CONTEXT.get() else {
            thread::sleep(IDLE_POLL);
            return;
        };
        let state = self.cpu.state();
        let (mut state, _) = self
            .cpu
            .baton
            .wait_timeout_while(state, IDLE_POLL, |state| !state.pending)
            .unwrap_or_else(PoisonError::into_inner);
        let pending = std::mem::take(&mut state.pending);
        drop(state);
        if pending {
            self.switch_from(kernel, me);
        }
    }
}

fn spawn_context(cpu: Arc<Cpu>, context: StackPointer) {
    let spawned = thread::Builder::new()
        .name(format!("rk {context}"))
        .spawn(move || {
            CONTEXT.set(Some(context));
            drop(cpu.wait_for(cpu.state(), context));
            // SAFETY: contexts come from the kernel, which only hands out
            // stack pointers produced by the stack builder, and the storage
            // outlives the thread.
            unsafe { restore(context) }
        });
    if let Err(error) = spawned {
        panic!("cannot create an OS thread for {context}: {error}");
    }
}

/// Starts the code described by the initial frame at `context`.
///
/// # Safety
///
/// `context` must point at an initial frame written by the stack builder.
unsafe fn restore(context: StackPointer) -> ! {
    // SAFETY: guaranteed by the caller.
    let frame = unsafe { StackFrame::at(context) }.exception;
    // SAFETY: the builder stores the runner's address as the program counter.
    let entry = unsafe { core::mem::transmute::<usize, Restore>(frame.pc) };
    entry(frame.r0, frame.r1, frame.r2, frame.r3)
}

fn park_forever() -> ! {
    loop {
        thread::park();
    }
}
