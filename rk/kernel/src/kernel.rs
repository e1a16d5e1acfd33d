//! Kernel instance.
//!
//! [`Kernel`] puts the [`Scheduler`] behind a critical section and pairs it
//! with the platform [`Port`]. Every structural change happens inside one
//! short critical section; switch requests to the port, logging and stack
//! preparation happen outside it.
//!
//! One process-wide instance is created with [`init`] and reached through
//! [`kernel()`]. Tests and hosted simulations may also leak their own
//! instances; every thread-facing method takes `&'static self`.

use core::cell::{RefCell, RefMut};
use core::fmt;

use critical_section::{CriticalSection, Mutex};
use log::{debug, info, trace};
use rk_core::{Priority, RkError, RkResult, ThreadId, ThreadState, Tick, TickDuration};
use spin::Once;

use crate::arch::{EntryDescriptor, RunnerHook, StackPointer};
use crate::port::Port;
use crate::scheduler::Scheduler;
use crate::stack::Stack;
use crate::thread::{ThreadConfig, ThreadControlBlock};

/// Kernel configuration.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Name used in log records
    pub name: &'static str,
    /// Frequency at which the port calls [`Kernel::tick`]
    pub tick_rate_hz: u32,
    /// Ticks a thread runs before yielding to a ready peer of equal priority
    pub round_robin_quantum: u32,
    /// Called on every pass of the idle loop, before the port's idle routine
    pub idle_hook: Option<fn()>,
}

impl KernelConfig {
    /// Default configuration: 1 kHz tick, one-tick round-robin quantum
    pub const DEFAULT: KernelConfig = KernelConfig {
        name: "rk",
        tick_rate_hz: 1000,
        round_robin_quantum: 1,
        idle_hook: None,
    };

    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the tick frequency in Hz.
    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        assert!(hz > 0, "tick rate must be greater than 0");
        self.config.tick_rate_hz = hz;
        self
    }

    /// Sets the round-robin quantum in ticks.
    pub fn round_robin_quantum(mut self, ticks: u32) -> Self {
        assert!(ticks > 0, "round-robin quantum must be at least one tick");
        self.config.round_robin_quantum = ticks;
        self
    }

    /// Sets the idle hook.
    pub fn idle_hook(mut self, hook: fn()) -> Self {
        self.config.idle_hook = Some(hook);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

/// Scheduler, port and configuration of one kernel.
pub struct Kernel {
    scheduler: Mutex<RefCell<Scheduler>>,
    port: &'static dyn Port,
    config: KernelConfig,
}

impl Kernel {
    /// Creates a kernel with no threads.
    pub const fn new(port: &'static dyn Port, config: KernelConfig) -> Self {
        Self {
            scheduler: Mutex::new(RefCell::new(Scheduler::new(config.round_robin_quantum))),
            port,
            config,
        }
    }

    /// Kernel configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Platform port
    pub fn port(&self) -> &'static dyn Port {
        self.port
    }

    /// Creates a thread and makes it ready.
    ///
    /// Builds the stack in the supplied storage outside the critical section.
    /// The storage is consumed even when no thread slot is free. The idle
    /// priority and anything above [`Priority::MAX`] are rejected.
    pub fn spawn(&'static self, config: ThreadConfig) -> RkResult<ThreadId> {
        if config.priority.is_idle() || config.priority > Priority::MAX {
            return Err(RkError::InvalidPriority);
        }
        self.create(config)
    }

    /// Creates the idle thread in `idle_stack`, makes the first scheduling
    /// decision and hands the CPU to the chosen thread.
    ///
    /// Panics when called twice.
    pub fn start(&'static self, idle_stack: &'static mut [u8]) -> ! {
        assert!(!self.is_started(), "kernel {} started twice", self.config.name);
        let idle = ThreadConfig::new(Priority::IDLE, idle_stack, idle_loop).with_argument(self.as_argument());
        if let Err(error) = self.create(idle) {
            panic!("cannot create the idle thread: {error}");
        }

        let (stack_pointer, threads) = critical_section::with(|cs| {
            let mut scheduler = self.scheduler(cs);
            (scheduler.start(), scheduler.thread_count())
        });
        info!("{}: started with {threads} threads", self.config.name);
        self.port.start_first_thread(self, stack_pointer)
    }

    /// Tick interrupt entry point.
    ///
    /// Returns whether the port should switch context on the way out of
    /// the interrupt.
    pub fn tick(&self) -> bool {
        critical_section::with(|cs| self.scheduler(cs).tick())
    }

    /// Context-switch trap entry point: saves the outgoing thread's stack
    /// pointer and returns the one to restore.
    pub fn switch_context(&self, stack_pointer: StackPointer) -> StackPointer {
        critical_section::with(|cs| self.scheduler(cs).switch_context(stack_pointer))
    }

    /// The running thread. Panics before [`Kernel::start`].
    pub fn current(&self) -> ThreadId {
        match critical_section::with(|cs| self.scheduler(cs).current()) {
            Some(id) => id,
            None => panic!("kernel {} has not started", self.config.name),
        }
    }

    /// Gives up the CPU to the next ready thread of equal priority, if any.
    pub fn yield_now(&self) {
        self.assert_thread_context("yield_now");
        self.with_running(Scheduler::yield_current);
        self.request_switch();
    }

    /// Blocks the calling thread for at least `duration` full ticks.
    pub fn sleep_for(&self, duration: TickDuration) {
        self.sleep_until(duration.deadline_from(self.tick_count()));
    }

    /// Blocks the calling thread until the tick counter reaches `deadline`.
    pub fn sleep_until(&self, deadline: Tick) {
        self.assert_thread_context("sleep");
        loop {
            let blocked = self.with_running(|scheduler| {
                if scheduler.tick_count().has_reached(deadline) {
                    false
                } else {
                    scheduler.block_current(None, Some(deadline));
                    true
                }
            });
            if !blocked {
                return;
            }
            self.request_switch();
        }
    }

    /// Pauses a thread until [`Kernel::resume`].
    ///
    /// A thread blocked on a queue leaves its wait list and retries the
    /// operation once resumed.
    pub fn suspend(&self, id: ThreadId) -> RkResult<()> {
        let switch = critical_section::with(|cs| self.scheduler(cs).suspend(id))?;
        debug!("{}: {id} suspended", self.config.name);
        if switch {
            self.request_switch();
        }
        Ok(())
    }

    /// Makes a suspended thread ready again.
    pub fn resume(&self, id: ThreadId) -> RkResult<()> {
        let switch = critical_section::with(|cs| self.scheduler(cs).resume(id))?;
        debug!("{}: {id} resumed", self.config.name);
        if switch {
            self.request_switch();
        }
        Ok(())
    }

    /// Frees the slot of a terminated thread and hands back its stack
    /// storage.
    pub fn reap(&self, id: ThreadId) -> RkResult<&'static mut [u8]> {
        let tcb = critical_section::with(|cs| self.scheduler(cs).reap(id))?;
        let storage = tcb.into_stack().into_storage();
        debug!("{}: reaped {id}, {} bytes returned", self.config.name, storage.len());
        Ok(storage)
    }

    /// Current value of the tick counter
    pub fn tick_count(&self) -> Tick {
        critical_section::with(|cs| self.scheduler(cs).tick_count())
    }

    /// Converts milliseconds to ticks at the configured tick rate
    pub fn millis(&self, millis: u32) -> TickDuration {
        TickDuration::from_millis(millis, self.config.tick_rate_hz)
    }

    /// State of a live thread
    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        critical_section::with(|cs| self.scheduler(cs).thread(id).map(ThreadControlBlock::state))
    }

    /// Number of threads, including the idle thread once started
    pub fn thread_count(&self) -> usize {
        critical_section::with(|cs| self.scheduler(cs).thread_count())
    }

    /// Whether [`Kernel::start`] ran
    pub fn is_started(&self) -> bool {
        critical_section::with(|cs| self.scheduler(cs).is_started())
    }

    pub(crate) fn scheduler<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Scheduler> {
        self.scheduler.borrow_ref_mut(cs)
    }

    pub(crate) fn request_switch(&self) {
        self.port.request_context_switch(self);
    }

    pub(crate) fn in_interrupt(&self) -> bool {
        self.port.in_interrupt()
    }

    /// Runs `f` once the calling thread is `Running` again, taking the
    /// switch a suspension from interrupt context left pending.
    fn with_running<R>(&self, mut f: impl FnMut(&mut Scheduler) -> R) -> R {
        loop {
            let ran = critical_section::with(|cs| {
                let mut scheduler = self.scheduler(cs);
                assert!(scheduler.is_started(), "kernel {} has not started", self.config.name);
                scheduler.current_is_running().then(|| f(&mut *scheduler))
            });
            match ran {
                Some(result) => return result,
                None => self.request_switch(),
            }
        }
    }

    /// Panics when called from interrupt context.
    pub(crate) fn assert_thread_context(&self, operation: &str) {
        assert!(!self.in_interrupt(), "{operation} called from interrupt context");
    }

    fn create(&'static self, config: ThreadConfig) -> RkResult<ThreadId> {
        let ThreadConfig {
            priority,
            stack,
            entry,
            argument,
            exit_hook,
        } = config;

        let descriptor = EntryDescriptor {
            argument: self.as_argument(),
            run: launch,
            pre_termination: exit_hook.map(|_| run_exit_hook as RunnerHook),
            termination: terminate,
        };
        let (stack, stack_pointer) = Stack::new(stack, &descriptor);
        let stack_size = stack.size();

        let (id, preempt) = critical_section::with(|cs| {
            let mut scheduler = self.scheduler(cs);
            let id = scheduler.vacant_slot()?;
            let tcb = ThreadControlBlock::new(id, priority, stack, stack_pointer, entry, argument, exit_hook);
            scheduler.add(tcb)?;
            Ok::<_, RkError>((id, scheduler.is_started() && scheduler.preempts_current(priority)))
        })?;

        debug!("{}: created {id} at {priority} with a {stack_size}-byte stack", self.config.name);
        if preempt {
            self.request_switch();
        }
        Ok(id)
    }

    fn terminate_current(&self) {
        let id = self.with_running(Scheduler::terminate_current);
        debug!("{}: {id} terminated", self.config.name);
        self.request_switch();
    }

    fn as_argument(&'static self) -> usize {
        self as *const Kernel as usize
    }

    /// # Safety
    ///
    /// `argument` must come from [`Kernel::as_argument`].
    unsafe fn from_argument(argument: usize) -> &'static Kernel {
        // SAFETY: `as_argument` only takes `&'static Kernel`.
        unsafe { &*(argument as *const Kernel) }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("config", &self.config).finish_non_exhaustive()
    }
}

extern "C" fn launch(kernel: usize) {
    // SAFETY: every stack frame built by `create` carries `as_argument`.
    let kernel = unsafe { Kernel::from_argument(kernel) };
    let (entry, argument) = critical_section::with(|cs| match kernel.scheduler(cs).current_tcb() {
        Some(tcb) => tcb.entry(),
        None => panic!("thread launched without a current thread"),
    });
    trace!("{}: {} entering body", kernel.config.name, kernel.current());
    entry(argument);
}

extern "C" fn run_exit_hook(kernel: usize) {
    // SAFETY: as in `launch`.
    let kernel = unsafe { Kernel::from_argument(kernel) };
    let (id, hook) = critical_section::with(|cs| match kernel.scheduler(cs).current_tcb() {
        Some(tcb) => (tcb.id(), tcb.exit_hook()),
        None => panic!("exit hook without a current thread"),
    });
    if let Some(hook) = hook {
        hook(id);
    }
}

extern "C" fn terminate(kernel: usize) {
    // SAFETY: as in `launch`.
    let kernel = unsafe { Kernel::from_argument(kernel) };
    kernel.terminate_current();
}

fn idle_loop(kernel: usize) {
    // SAFETY: `start` passes `as_argument` to the idle thread.
    let kernel = unsafe { Kernel::from_argument(kernel) };
    loop {
        if let Some(hook) = kernel.config.idle_hook {
            hook();
        }
        kernel.port.idle(kernel);
    }
}

static KERNEL: Once<Kernel> = Once::new();

/// Creates the process-wide kernel instance.
///
/// Panics when called more than once.
pub fn init(port: &'static dyn Port, config: KernelConfig) -> &'static Kernel {
    let mut created = false;
    let kernel = KERNEL.call_once(|| {
        created = true;
        Kernel::new(port, config)
    });
    assert!(created, "kernel initialized twice");
    kernel
}

/// The process-wide kernel instance. Panics before [`init`].
pub fn kernel() -> &'static Kernel {
    match KERNEL.get() {
        Some(kernel) => kernel,
        None => panic!("kernel used before init()"),
    }
}
