//! Architecture-specific initial stack frames.
//!
//! Each architecture module describes the register image its context-switch
//! restore path expects and writes it at the top of a new thread's stack.
//! The layout is a fixed binary contract between the stack builder and the
//! port's trap handler, so exactly one architecture is selected at build
//! time and re-exported from here.

use core::fmt;

pub mod armv7m;

pub use armv7m::{StackFrame, MIN_STACK_SIZE, STACK_ALIGNMENT};

/// Saved stack pointer of a thread that is not running.
///
/// Opaque to the scheduler: only the stack builder and the port's trap
/// handler interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackPointer(pub usize);

impl StackPointer {
    /// Raw address
    pub const fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for StackPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sp:{:#x}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for StackPointer {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "sp:{=usize:#x}", self.0);
    }
}

/// Function invoked by the thread runner with the thread's argument word.
pub type RunnerHook = extern "C" fn(usize);

/// What a fresh thread executes once restored.
///
/// The runner calls `run(argument)`, then `pre_termination(argument)` if
/// present, then `termination(argument)`, and never returns.
#[derive(Debug, Clone, Copy)]
pub struct EntryDescriptor {
    /// Word handed to every hook
    pub argument: usize,
    /// Thread body
    pub run: RunnerHook,
    /// Runs after the body returns, before termination; may block
    pub pre_termination: Option<RunnerHook>,
    /// Finalizes the thread; must not return to the runner in practice
    pub termination: RunnerHook,
}
