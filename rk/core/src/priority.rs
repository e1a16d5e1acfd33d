//! Thread priorities and priority sets

use core::fmt;
use crate::{RkError, RkResult};

/// Number of distinct priority levels, idle included
pub const PRIORITY_LEVELS: usize = 64;

/// Type-safe thread priority. A higher number preempts a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Priority reserved for the idle thread
    pub const IDLE: Priority = Priority(0);

    /// Lowest priority available to application threads
    pub const MIN: Priority = Priority(1);

    /// Highest priority level
    pub const MAX: Priority = Priority(PRIORITY_LEVELS as u8 - 1);

    /// Create an application priority level.
    ///
    /// Zero is reserved for the idle thread; values above [`Priority::MAX`]
    /// have no ready list.
    pub fn new(priority: u8) -> RkResult<Self> {
        if priority == 0 || priority > Self::MAX.0 {
            Err(RkError::InvalidPriority)
        } else {
            Ok(Priority(priority))
        }
    }

    /// Create priority without validation (const fn)
    pub const fn new_unchecked(priority: u8) -> Self {
        Priority(priority)
    }

    /// Get the raw priority value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index of this priority's ready list
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Check if this is the idle priority
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Set of priority levels, one bit per level.
///
/// Finding the highest member is a single leading-zero count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityMask(u64);

impl PriorityMask {
    /// Empty priority mask
    pub const EMPTY: Self = Self(0);

    /// Create a new empty priority mask
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Set a priority in the mask
    pub fn set(&mut self, priority: Priority) {
        self.0 |= Self::bit(priority);
    }

    /// Clear a priority in the mask
    pub fn clear(&mut self, priority: Priority) {
        self.0 &= !Self::bit(priority);
    }

    /// Check if a priority is set in the mask
    pub const fn is_set(&self, priority: Priority) -> bool {
        self.0 & Self::bit(priority) != 0
    }

    /// Check if the mask is empty
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Find the highest priority set in the mask
    pub const fn highest(&self) -> Option<Priority> {
        if self.is_empty() {
            None
        } else {
            Some(Priority((63 - self.0.leading_zeros()) as u8))
        }
    }

    /// Raw bit pattern
    pub const fn bits(self) -> u64 {
        self.0
    }

    const fn bit(priority: Priority) -> u64 {
        assert!(priority.index() < PRIORITY_LEVELS, "priority out of range");
        1u64 << priority.0
    }
}

impl Default for PriorityMask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PriorityMask {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "PriorityMask({=u64:b})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {{
        const P: $crate::Priority = {
            assert!($value > 0 && $value < $crate::PRIORITY_LEVELS, "invalid priority literal");
            $crate::Priority::new_unchecked($value)
        };
        P
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_creation() {
        assert_eq!(Priority::new(0), Err(RkError::InvalidPriority));
        assert!(Priority::new(1).is_ok());
        assert!(Priority::new(63).is_ok());
        assert_eq!(Priority::new(64), Err(RkError::InvalidPriority));
    }

    #[test]
    fn test_priority_mask() {
        let mut mask = PriorityMask::new();
        assert!(mask.is_empty());
        assert_eq!(mask.highest(), None);

        let p1 = Priority::new(1).unwrap();
        let p5 = Priority::new(5).unwrap();

        mask.set(p1);
        mask.set(p5);
        mask.set(Priority::IDLE);

        assert!(mask.is_set(p1));
        assert!(mask.is_set(p5));
        assert!(!mask.is_set(Priority::new(3).unwrap()));
        assert_eq!(mask.highest(), Some(p5));

        mask.clear(p5);
        assert_eq!(mask.highest(), Some(p1));
        mask.clear(p1);
        assert_eq!(mask.highest(), Some(Priority::IDLE));
    }

    #[test]
    fn test_mask_top_level() {
        let mut mask = PriorityMask::new();
        mask.set(Priority::MAX);
        assert_eq!(mask.bits(), 1 << 63);
        assert_eq!(mask.highest(), Some(Priority::MAX));
    }
}
