//! Clock tick source for POSIX
//!
//! Drives [`PosixPort::tick`] from a dedicated thread at the kernel's
//! configured tick rate. Sleeps until absolute deadlines on the monotonic
//! clock so the tick count does not drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rk_kernel::Kernel;

use crate::port::PosixPort;
use crate::MAX_TICK_RATE_HZ;

/// Nanoseconds per second
const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Tick period at `rate_hz`
pub fn tick_period(rate_hz: u32) -> Duration {
    assert!(rate_hz > 0, "tick rate must be greater than 0");
    assert!(rate_hz <= MAX_TICK_RATE_HZ, "tick rate too high (max 10kHz)");
    Duration::from_nanos(NSEC_PER_SEC / rate_hz as u64)
}

/// Running ticker thread; stops when dropped.
#[derive(Debug)]
pub struct Ticker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Starts ticking `kernel` through `port` at the configured tick rate.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rk_kernel::{Kernel, KernelConfig};
    /// use rk_posix::{PosixPort, Ticker};
    ///
    /// let port: &'static PosixPort = Box::leak(Box::default());
    /// let config = KernelConfig::builder().tick_rate_hz(100).build();
    /// let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(port, config)));
    ///
    /// let ticker = Ticker::start(kernel, port);
    /// std::thread::sleep(std::time::Duration::from_millis(50));
    /// ticker.stop();
    /// ```
    pub fn start(kernel: &'static Kernel, port: &'static PosixPort) -> Ticker {
        let period = tick_period(kernel.config().tick_rate_hz);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(format!("{} ticker", kernel.config().name))
            .spawn(move || ticker_thread(kernel, port, period, &flag));
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(error) => {
                warn!("{}: cannot start the ticker: {error}", kernel.config().name);
                running.store(false, Ordering::SeqCst);
                None
            }
        };
        debug!("{}: ticking every {period:?}", kernel.config().name);
        Ticker { running, thread }
    }

    /// Whether the ticker thread is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the ticker thread and waits for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleeps until the next absolute tick time rather than for a relative
/// duration, then ticks.
fn ticker_thread(kernel: &'static Kernel, port: &'static PosixPort, period: Duration, running: &AtomicBool) {
    let mut next_tick = Instant::now();

    while running.load(Ordering::Relaxed) {
        next_tick += period;

        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }

        port.tick(kernel);
    }
}
