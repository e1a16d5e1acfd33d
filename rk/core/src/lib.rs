#![no_std]
#![forbid(unsafe_code)]

//! # rk Core
//!
//! Core types shared by every layer of the rk real-time kernel: priorities,
//! ticks and durations, thread handles and lifecycle states, and the error
//! type returned by recoverable kernel operations.

use core::fmt;

pub mod priority;
pub mod time;

pub use priority::*;
pub use time::*;

/// rk kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the rk kernel
pub type RkResult<T> = Result<T, RkError>;

/// Recoverable kernel errors.
///
/// Usage-precondition violations (an undersized stack, a second `start`,
/// blocking from interrupt context) are not represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RkError {
    /// The operation cannot complete without suspending the caller
    #[error("operation would block")]
    WouldBlock,
    /// The deadline of a timed operation expired
    #[error("operation timed out")]
    Timeout,
    /// Invalid priority level
    #[error("invalid priority level")]
    InvalidPriority,
    /// Every thread control block slot is in use
    #[error("no free thread control block slot")]
    NoFreeThreadSlot,
    /// Every wait list slot is in use
    #[error("no free wait list")]
    NoFreeWaitList,
    /// The handle does not name a live thread
    #[error("no such thread")]
    InvalidThread,
    /// The thread has not terminated yet
    #[error("thread has not terminated")]
    NotTerminated,
    /// The thread's current state does not allow the operation
    #[error("thread state does not allow this operation")]
    InvalidState,
    /// Storage allocation failed
    #[error("storage allocation failed")]
    OutOfMemory,
}

#[cfg(feature = "defmt")]
impl defmt::Format for RkError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            RkError::WouldBlock => defmt::write!(fmt, "WouldBlock"),
            RkError::Timeout => defmt::write!(fmt, "Timeout"),
            RkError::InvalidPriority => defmt::write!(fmt, "InvalidPriority"),
            RkError::NoFreeThreadSlot => defmt::write!(fmt, "NoFreeThreadSlot"),
            RkError::NoFreeWaitList => defmt::write!(fmt, "NoFreeWaitList"),
            RkError::InvalidThread => defmt::write!(fmt, "InvalidThread"),
            RkError::NotTerminated => defmt::write!(fmt, "NotTerminated"),
            RkError::InvalidState => defmt::write!(fmt, "InvalidState"),
            RkError::OutOfMemory => defmt::write!(fmt, "OutOfMemory"),
        }
    }
}

/// Stable handle of a thread: the index of its control block slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u8);

impl ThreadId {
    /// Create a handle for slot `index`
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Slot index of the thread
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "thread#{}", self.0);
    }
}

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Constructed, not yet handed to the scheduler
    Created,
    /// Eligible to run, waiting in a ready list
    Ready,
    /// Currently executing
    Running,
    /// Waiting for a wake condition (data, space, or a deadline)
    Blocked,
    /// Administratively paused
    Suspended,
    /// Body returned; never scheduled again
    Terminated,
}

impl ThreadState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Nothing leaves `Terminated`. Every other state may be suspended, and a
    /// suspended thread only ever resumes into `Ready`.
    pub const fn can_transition_to(self, next: ThreadState) -> bool {
        use ThreadState::*;
        match (self, next) {
            (Terminated, _) => false,
            (Suspended, Ready) => true,
            (Suspended, _) => false,
            (_, Suspended) => true,
            (Created, Ready) => true,
            (Ready, Running) => true,
            (Running, Ready) | (Running, Blocked) | (Running, Terminated) => true,
            (Blocked, Ready) => true,
            _ => false,
        }
    }

    /// Short lowercase name, for diagnostics
    pub const fn as_str(self) -> &'static str {
        match self {
            ThreadState::Created => "created",
            ThreadState::Ready => "ready",
            ThreadState::Running => "running",
            ThreadState::Blocked => "blocked",
            ThreadState::Suspended => "suspended",
            ThreadState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadState {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=str}", self.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use ThreadState::*;
        assert!(Created.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Running));
        assert!(Running.can_transition_to(Ready));
        assert!(Running.can_transition_to(Blocked));
        assert!(Running.can_transition_to(Terminated));
        assert!(Blocked.can_transition_to(Ready));
        assert!(Suspended.can_transition_to(Ready));

        assert!(!Ready.can_transition_to(Blocked));
        assert!(!Blocked.can_transition_to(Running));
        assert!(!Created.can_transition_to(Running));
        assert!(!Suspended.can_transition_to(Running));
    }

    #[test]
    fn test_any_live_state_can_be_suspended() {
        use ThreadState::*;
        for state in [Created, Ready, Running, Blocked] {
            assert!(state.can_transition_to(Suspended), "{state}");
        }
        assert!(!Suspended.can_transition_to(Suspended));
    }

    #[test]
    fn test_terminated_is_final() {
        use ThreadState::*;
        for next in [Created, Ready, Running, Blocked, Suspended, Terminated] {
            assert!(!Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_thread_id_index() {
        let id = ThreadId::new(7);
        assert_eq!(id.index(), 7);
    }
}
