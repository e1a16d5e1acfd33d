//! rk Kernel Port for ARMv7-M
//!
//! Connects the kernel to Cortex-M3/M4/M7 cores:
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │   Application threads           │
//! └────────────────┬────────────────┘
//!                  │
//! ┌────────────────▼────────────────┐
//! │  rk-kernel (scheduler, FIFO)    │
//! └────────────────┬────────────────┘
//!                  │ Port
//! ┌────────────────▼────────────────┐
//! │  rk-port-cortex-m               │
//! │  PendSV / SVCall / SysTick      │
//! └─────────────────────────────────┘
//! ```
//!
//! Threads run in privileged Thread mode on the process stack. Context
//! switches happen in PendSV at the lowest exception priority, so a switch
//! requested from an interrupt is taken once every handler has returned.
//! The first thread is entered through `svc 0`.
//!
//! The exception handlers only exist on bare-metal targets; a hosted build
//! keeps the pure helpers so they can be unit tested.
//!
//! # Usage
//!
//! ```rust,ignore
//! #![no_std]
//! #![no_main]
//!
//! use rk_port_cortex_m::CortexMPort;
//!
//! static PORT: CortexMPort = CortexMPort::new();
//!
//! #[cortex_m_rt::entry]
//! fn main() -> ! {
//!     let mut peripherals = cortex_m::Peripherals::take().unwrap();
//!     let kernel = rk_kernel::init(&PORT, KernelConfig::default());
//!     kernel.spawn(ThreadConfig::new(priority!(2), worker_stack(), worker)).unwrap();
//!
//!     rk_port_cortex_m::start_systick(&mut peripherals.SYST, 64_000_000, kernel.config().tick_rate_hz);
//!     kernel.start(idle_stack())
//! }
//! ```

#![no_std]

mod context;
#[cfg(all(feature = "systick", target_os = "none"))]
mod systick;

use cortex_m::peripheral::scb::{SystemHandler, VectActive};
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use rk_kernel::arch::StackPointer;
use rk_kernel::{Kernel, Port};

/// Lowest exception priority; PendSV and SysTick run here
const LOWEST_PRIORITY: u8 = 0xff;

/// Largest SysTick reload value (24-bit counter)
const MAX_RELOAD: u32 = 0x00ff_ffff;

/// [`Port`] for ARMv7-M cores.
#[derive(Debug, Default)]
pub struct CortexMPort {
    _private: (),
}

impl CortexMPort {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Port for CortexMPort {
    fn request_context_switch(&self, _kernel: &Kernel) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn in_interrupt(&self) -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn start_first_thread(&self, _kernel: &Kernel, stack_pointer: StackPointer) -> ! {
        // SAFETY: the kernel owns PendSV and SysTick; no priority-based
        // critical sections exist.
        unsafe {
            let mut peripherals = cortex_m::Peripherals::steal();
            peripherals.SCB.set_priority(SystemHandler::PendSV, LOWEST_PRIORITY);
            peripherals.SCB.set_priority(SystemHandler::SysTick, LOWEST_PRIORITY);
        }
        // SAFETY: `stack_pointer` carries an initial frame written by the
        // stack builder.
        unsafe { context::enter_first_thread(stack_pointer) }
    }

    fn idle(&self, _kernel: &Kernel) {
        cortex_m::asm::wfi();
    }
}

/// SysTick reload value for `tick_rate_hz` at `core_clock_hz`, if it fits
/// the 24-bit counter.
pub const fn systick_reload(core_clock_hz: u32, tick_rate_hz: u32) -> Option<u32> {
    if tick_rate_hz == 0 || core_clock_hz < tick_rate_hz {
        return None;
    }
    let reload = core_clock_hz / tick_rate_hz - 1;
    if reload > MAX_RELOAD {
        None
    } else {
        Some(reload)
    }
}

/// Configures SysTick to fire at `tick_rate_hz` from the core clock.
///
/// Panics when the rate cannot be reached with a 24-bit reload value.
pub fn start_systick(syst: &mut SYST, core_clock_hz: u32, tick_rate_hz: u32) {
    let Some(reload) = systick_reload(core_clock_hz, tick_rate_hz) else {
        panic!("SysTick cannot tick at {tick_rate_hz} Hz from a {core_clock_hz} Hz clock");
    };
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systick_reload() {
        assert_eq!(systick_reload(64_000_000, 1000), Some(63_999));
        assert_eq!(systick_reload(16_000_000, 100), Some(159_999));
        assert_eq!(systick_reload(1000, 1000), Some(0));
    }

    #[test]
    fn test_systick_reload_out_of_range() {
        assert_eq!(systick_reload(64_000_000, 0), None);
        assert_eq!(systick_reload(999, 1000), None);
        // 1 Hz from 64 MHz needs more than 24 bits
        assert_eq!(systick_reload(64_000_000, 1), None);
        assert_eq!(systick_reload(MAX_RELOAD + 1, 1), Some(MAX_RELOAD));
    }
}
