//! # Scheduler Tick
//!
//! The platform tick rate and conversions between milliseconds and ticks.
//! Millisecond delays are always rounded *up* so a delay expressed in ticks
//! is never shorter than the one requested.

use static_assertions::const_assert;

// =============================================================================
// Constants
// =============================================================================

/// Milliseconds per second
pub const MS_PER_SEC: u64 = 1_000;

/// Default scheduler tick frequency (10 ms tick)
pub const DEFAULT_TICKS_PER_SEC: u32 = 100;

const_assert!(DEFAULT_TICKS_PER_SEC > 0);

/// Delay expressed in scheduler ticks
pub type Ticks = u32;

// =============================================================================
// Tick Rate
// =============================================================================

/// Scheduler tick frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    ticks_per_sec: u32,
}

impl TickRate {
    /// Default platform tick rate
    pub const DEFAULT: TickRate = TickRate::new(DEFAULT_TICKS_PER_SEC);

    /// Create a tick rate
    ///
    /// A rate of zero is clamped to one tick per second.
    pub const fn new(ticks_per_sec: u32) -> Self {
        Self {
            ticks_per_sec: if ticks_per_sec == 0 { 1 } else { ticks_per_sec },
        }
    }

    /// Ticks per second
    pub const fn ticks_per_sec(&self) -> u32 {
        self.ticks_per_sec
    }

    /// Length of one tick in milliseconds, rounded up
    pub const fn tick_period_ms(&self) -> u64 {
        MS_PER_SEC.div_ceil(self.ticks_per_sec as u64)
    }

    /// Convert milliseconds to ticks, rounding up
    ///
    /// Saturates at `Ticks::MAX`.
    pub const fn ms_to_ticks(&self, ms: u32) -> Ticks {
        let ticks = (ms as u64 * self.ticks_per_sec as u64).div_ceil(MS_PER_SEC);
        if ticks > Ticks::MAX as u64 {
            Ticks::MAX
        } else {
            ticks as Ticks
        }
    }

    /// Convert ticks to milliseconds
    pub const fn ticks_to_ms(&self, ticks: Ticks) -> u64 {
        ticks as u64 * MS_PER_SEC / self.ticks_per_sec as u64
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// TESTS
// =============================================================================
