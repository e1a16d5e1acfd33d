//! Tick counter and durations
//!
//! The tick counter is a wrapping `u32`. Two ticks are ordered by the
//! wrapping difference between them read as a signed value, so comparisons
//! stay correct across a wrap as long as the ticks are less than 2^31 apart.
//! [`TickDuration::MAX`] keeps every deadline inside that window.

use core::fmt;
use core::ops::Add;

/// Point on the kernel tick counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(u32);

impl Tick {
    /// Zero tick
    pub const ZERO: Self = Self(0);

    /// Create a new tick count
    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Get the raw tick value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Increment the tick counter
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Calculate elapsed ticks since a previous tick
    pub const fn elapsed_since(self, previous: Tick) -> u32 {
        self.0.wrapping_sub(previous.0)
    }

    /// Check if this tick is strictly after another tick (handles wraparound)
    pub const fn is_after(self, other: Tick) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// Check if `deadline` is now or in the past (handles wraparound)
    pub const fn has_reached(self, deadline: Tick) -> bool {
        (self.0.wrapping_sub(deadline.0) as i32) >= 0
    }
}

impl Add<TickDuration> for Tick {
    type Output = Tick;

    fn add(self, duration: TickDuration) -> Tick {
        Tick(self.0.wrapping_add(duration.ticks()))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Tick {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}

/// Duration in kernel ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TickDuration {
    ticks: u32,
}

impl TickDuration {
    /// Zero duration
    pub const ZERO: Self = Self { ticks: 0 };

    /// Longest duration that stays wrap-safe
    pub const MAX: Self = Self { ticks: i32::MAX as u32 };

    /// Create duration from ticks, clamped to [`TickDuration::MAX`]
    pub const fn from_ticks(ticks: u32) -> Self {
        if ticks > Self::MAX.ticks {
            Self::MAX
        } else {
            Self { ticks }
        }
    }

    /// Create duration from milliseconds at the given tick rate, rounding up
    pub const fn from_millis(millis: u32, tick_rate_hz: u32) -> Self {
        let ticks = (millis as u64 * tick_rate_hz as u64).div_ceil(1000);
        if ticks > Self::MAX.ticks as u64 {
            Self::MAX
        } else {
            Self { ticks: ticks as u32 }
        }
    }

    /// Get tick count
    pub const fn ticks(self) -> u32 {
        self.ticks
    }

    /// Check if duration is zero
    pub const fn is_zero(self) -> bool {
        self.ticks == 0
    }

    /// Deadline for a timed wait starting at `now`.
    ///
    /// A non-zero wait also covers the partial tick already in progress, so
    /// the caller waits at least `self` full tick periods. A zero wait is due
    /// immediately.
    pub fn deadline_from(self, now: Tick) -> Tick {
        if self.is_zero() {
            now
        } else {
            now + TickDuration::from_ticks(self.ticks.saturating_add(1))
        }
    }
}

impl fmt::Display for TickDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ticks", self.ticks)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TickDuration {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}ticks", self.ticks);
    }
}

/// Macro to create tick durations
#[macro_export]
macro_rules! ticks {
    ($value:expr) => {
        $crate::TickDuration::from_ticks($value)
    };
}
