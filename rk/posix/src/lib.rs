//! # rk POSIX Port
//!
//! Runs the rk kernel on a hosted system for development and testing.
//! A single core is simulated with OS threads: each kernel thread gets its
//! own OS thread, and only the one holding the simulated CPU executes.
//!
//! ```no_run
//! use rk_kernel::{Kernel, KernelConfig, Priority, ThreadConfig};
//! use rk_posix::{PosixPort, Ticker};
//!
//! fn worker(_: usize) {}
//!
//! let port: &'static PosixPort = Box::leak(Box::default());
//! let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(port, KernelConfig::default())));
//! let stack = Box::leak(vec![0u8; 4096].into_boxed_slice());
//! kernel.spawn(ThreadConfig::new(Priority::MIN, stack, worker)).unwrap();
//!
//! let _ticker = Ticker::start(kernel, port);
//! let idle = Box::leak(vec![0u8; 4096].into_boxed_slice());
//! std::thread::spawn(move || kernel.start(idle));
//! ```

pub mod port;
pub mod ticker;

pub use port::PosixPort;
pub use ticker::{tick_period, Ticker};

/// Highest tick rate the ticker thread supports
pub const MAX_TICK_RATE_HZ: u32 = 10_000;
