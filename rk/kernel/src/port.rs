//! Platform port interface.
//!
//! A port supplies the pieces the kernel cannot express portably: the
//! context-switch trap, interrupt-context detection and the first restore.
//! Its trap handler saves the running thread's registers, calls
//! [`Kernel::switch_context`] with the resulting stack pointer and restores
//! from the pointer it gets back.

use crate::arch::StackPointer;
use crate::kernel::Kernel;

/// Platform services required by the kernel.
pub trait Port: Sync {
    /// Arranges for a context switch as soon as the caller leaves kernel
    /// code.
    ///
    /// Never called with the kernel's critical section held.
    fn request_context_switch(&self, kernel: &Kernel);

    /// Whether the caller runs in interrupt (handler) context.
    fn in_interrupt(&self) -> bool;

    /// Restores the first thread from `stack_pointer`; never returns.
    fn start_first_thread(&self, kernel: &Kernel, stack_pointer: StackPointer) -> !;

    /// One iteration of the idle thread's loop.
    fn idle(&self, kernel: &Kernel) {
        let _ = kernel;
        core::hint::spin_loop();
    }
}
