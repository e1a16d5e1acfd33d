#![no_std]

//! # rk Kernel
//!
//! Preemptive fixed-priority kernel core: thread stacks and control blocks,
//! the scheduler and its context-switch protocol, and the blocking FIFO
//! queue that higher-level synchronization objects are built from.
//!
//! The kernel never allocates. Thread stacks and FIFO storage come from the
//! caller; [`dynamic::DynamicFifoQueue`] (feature `alloc`) is a convenience
//! wrapper that owns heap storage.
//!
//! ```ignore
//! static PORT: MyPort = MyPort::new();
//!
//! let kernel = rk_kernel::init(&PORT, KernelConfig::default());
//! kernel.spawn(ThreadConfig::new(priority!(3), worker_stack, worker))?;
//! kernel.start(idle_stack)
//! ```

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod arch;
#[cfg(feature = "alloc")]
pub mod dynamic;
pub mod fifo;
pub mod kernel;
mod list;
pub mod port;
mod runner;
pub mod scheduler;
pub mod stack;
pub mod thread;

pub use rk_core::*;

pub use fifo::{FifoQueue, PushError};
pub use kernel::{init, kernel, Kernel, KernelConfig, KernelConfigBuilder};
pub use port::Port;
pub use thread::{ThreadConfig, ThreadControlBlock};

#[cfg(feature = "alloc")]
pub use dynamic::DynamicFifoQueue;

/// Maximum number of threads, the idle thread included
pub const MAX_THREADS: usize = 16;

/// Size of the wait list pool; every FIFO queue takes two
pub const MAX_WAIT_LISTS: usize = 32;
