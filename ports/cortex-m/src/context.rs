//! Context-switch exception handlers.
//!
//! The saved context matches `rk_kernel::arch::StackFrame`: r4-r11 (and
//! EXC_RETURN with `fpu`) below the hardware-stacked r0-r3, r12, lr, pc and
//! xPSR. With `fpu`, threads that used the FPU also keep s16-s31 between the
//! two halves.
//!
//! Interrupts are live between `Kernel::start` marking the first thread
//! running and the `svc 0` that restores it. A PendSV taken in that window
//! interrupted the main stack, not a thread, so it saves nothing and only
//! records the switch. SVCall pends it again once the first thread's
//! context is loaded, and it tail-chains right after.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "none")]
use core::arch::{asm, global_asm};

use rk_kernel::arch::StackPointer;

/// A switch was requested before the first thread was entered
static SWITCH_DEFERRED: AtomicBool = AtomicBool::new(false);

/// Called from PendSV with the outgoing thread's process stack pointer.
#[no_mangle]
extern "C" fn rk_port_switch_context(stack_pointer: usize) -> usize {
    rk_kernel::kernel().switch_context(StackPointer(stack_pointer)).addr()
}

/// Tail-called from PendSV when it interrupted the main stack.
#[no_mangle]
extern "C" fn rk_port_defer_switch() {
    SWITCH_DEFERRED.store(true, Ordering::Relaxed);
}

/// Called from SVCall before the first thread's context is loaded.
#[cfg(target_os = "none")]
#[no_mangle]
extern "C" fn rk_port_first_restore() {
    if take_deferred_switch() {
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

#[cfg(any(target_os = "none", test))]
fn take_deferred_switch() -> bool {
    SWITCH_DEFERRED.swap(false, Ordering::Relaxed)
}

// EXC_RETURN bit 2 clear: the interrupted context used MSP.
#[cfg(all(target_os = "none", not(feature = "fpu")))]
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    tst lr, #4",
    "    beq 1f",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    bl rk_port_switch_context",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    mvn lr, #2", // EXC_RETURN 0xfffffffd: Thread mode, PSP
    "    bx lr",
    "1:",
    "    b rk_port_defer_switch",
    "",
    ".section .text.SVCall,\"ax\",%progbits",
    ".global SVCall",
    ".type SVCall,%function",
    ".thumb_func",
    "SVCall:",
    "    push {{r0, lr}}",
    "    bl rk_port_first_restore",
    "    pop {{r0, lr}}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    mvn lr, #2", // EXC_RETURN 0xfffffffd: Thread mode, PSP
    "    bx lr",
);

#[cfg(all(target_os = "none", feature = "fpu"))]
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    tst lr, #4",
    "    beq 1f",
    "    mrs r0, psp",
    "    tst lr, #0x10",
    "    it eq",
    "    vstmdbeq r0!, {{s16-s31}}",
    "    stmdb r0!, {{r4-r11, lr}}",
    "    bl rk_port_switch_context",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    tst lr, #0x10",
    "    it eq",
    "    vldmiaeq r0!, {{s16-s31}}",
    "    msr psp, r0",
    "    bx lr",
    "1:",
    "    b rk_port_defer_switch",
    "",
    ".section .text.SVCall,\"ax\",%progbits",
    ".global SVCall",
    ".type SVCall,%function",
    ".thumb_func",
    "SVCall:",
    "    push {{r0, lr}}",
    "    bl rk_port_first_restore",
    "    pop {{r0, lr}}",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    msr psp, r0",
    "    bx lr",
);

/// Restores the first thread through SVCall.
///
/// # Safety
///
/// Thread mode on the main stack, and `stack_pointer` must carry an
/// initial frame.
#[cfg(target_os = "none")]
pub(crate) unsafe fn enter_first_thread(stack_pointer: StackPointer) -> ! {
    // SAFETY: SVC escalates to HardFault with interrupts masked.
    unsafe { cortex_m::interrupt::enable() };
    // SAFETY: the SVCall handler above consumes r0 as the thread's stack
    // pointer and never returns here.
    unsafe {
        asm!(
            "svc 0",
            in("r0") stack_pointer.addr(),
            options(noreturn),
        )
    }
}

#[cfg(not(target_os = "none"))]
pub(crate) unsafe fn enter_first_thread(stack_pointer: StackPointer) -> ! {
    panic!("cannot enter {stack_pointer} on a hosted target")
}
