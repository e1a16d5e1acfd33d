//! ARMv7-M (Cortex-M3/M4/M7) initial stack frame.
//!
//! On exception entry the core pushes the caller-saved registers
//! ([`ExceptionStackFrame`]); the PendSV handler pushes the callee-saved ones
//! below them ([`SoftwareStackFrame`]). A new thread's stack is prepared so
//! the handler's restore path pops a valid image of both and the exception
//! return lands in the thread runner.

use core::mem::{align_of, size_of};

use super::{EntryDescriptor, StackPointer};
use crate::runner;

/// Required alignment of the stack pointer at exception entry, in bytes
pub const STACK_ALIGNMENT: usize = 8;

/// xPSR with only the Thumb bit set
pub const DEFAULT_XPSR: usize = 0x0100_0000;

/// Mask applied to the stacked program counter. Thumb function addresses
/// carry bit 0, which an exception return must not see; the execution state
/// comes from xPSR.T instead.
const PC_MASK: usize = if cfg!(target_arch = "arm") { !1 } else { !0 };

/// EXC_RETURN: thread mode, process stack, basic (non-FP) frame
#[cfg(feature = "fpu")]
pub const DEFAULT_EXCEPTION_RETURN: usize = 0xffff_fffd;

/// Registers saved by the context-switch handler.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareStackFrame {
    pub r4: usize,
    pub r5: usize,
    pub r6: usize,
    pub r7: usize,
    pub r8: usize,
    pub r9: usize,
    pub r10: usize,
    pub r11: usize,
    /// Tells the handler whether the hardware frame carries FP state
    #[cfg(feature = "fpu")]
    pub exception_return: usize,
}

/// Registers stacked by the hardware on exception entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionStackFrame {
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
}

/// Complete register image of a thread that is not running.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub software: SoftwareStackFrame,
    pub exception: ExceptionStackFrame,
}

/// Smallest usable stack: the initial frame plus the same again for the
/// runner's own calls.
pub const MIN_STACK_SIZE: usize = 2 * size_of::<StackFrame>();

impl StackFrame {
    /// Register image that starts `entry` through the thread runner.
    ///
    /// Callee-saved registers carry recognizable poison values.
    pub fn initial(entry: &EntryDescriptor) -> Self {
        Self {
            software: SoftwareStackFrame {
                r4: 0x4444_4444,
                r5: 0x5555_5555,
                r6: 0x6666_6666,
                r7: 0x7777_7777,
                r8: 0x8888_8888,
                r9: 0x9999_9999,
                r10: 0xaaaa_aaaa,
                r11: 0xbbbb_bbbb,
                #[cfg(feature = "fpu")]
                exception_return: DEFAULT_EXCEPTION_RETURN,
            },
            exception: ExceptionStackFrame {
                r0: entry.argument,
                r1: entry.run as usize,
                r2: entry.pre_termination.map_or(0, |hook| hook as usize),
                r3: entry.termination as usize,
                r12: 0xcccc_cccc,
                lr: 0,
                pc: runner_address(),
                xpsr: DEFAULT_XPSR,
            },
        }
    }

    /// Writes the initial frame for `entry` at the top of `region` and
    /// returns the stack pointer the restore path starts from.
    ///
    /// Panics if the region cannot hold a frame or its end is misaligned.
    pub(crate) fn write_initial(region: &mut [u8], entry: &EntryDescriptor) -> StackPointer {
        let size = size_of::<StackFrame>();
        assert!(
            region.len() >= size,
            "stack region of {} bytes cannot hold a {size}-byte frame",
            region.len()
        );
        let offset = region.len() - size;
        let frame = region[offset..].as_mut_ptr();
        assert!(
            frame.align_offset(align_of::<StackFrame>()) == 0,
            "misaligned initial stack frame at {frame:p}"
        );
        // SAFETY: the pointer covers `size` bytes of `region` and is aligned
        // for `StackFrame`, which is plain words with no invalid values.
        unsafe { frame.cast::<StackFrame>().write(Self::initial(entry)) };
        StackPointer(frame as usize)
    }

    /// Typed view of the frame `stack_pointer` refers to.
    ///
    /// # Safety
    ///
    /// `stack_pointer` must be the saved stack pointer of a thread whose
    /// stack is still alive, and the frame must not be mutated for `'a`.
    pub unsafe fn at<'a>(stack_pointer: StackPointer) -> &'a StackFrame {
        let frame = stack_pointer.0 as *const StackFrame;
        debug_assert!(frame.is_aligned(), "misaligned stack pointer {stack_pointer}");
        // SAFETY: upheld by the caller.
        unsafe { &*frame }
    }
}

fn runner_address() -> usize {
    (runner::thread_runner as *const () as usize) & PC_MASK
}
