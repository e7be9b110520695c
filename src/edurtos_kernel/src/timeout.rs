//! Tick arithmetic and timeouts
use crate::KernelCfg;

/// A tick count. Wraps around on overflow.
pub type Ticks = u32;

/// The timeout value meaning "wait forever".
pub const INFINITE: Ticks = Ticks::MAX;

/// The point in time at which a bounded wait gives up.
///
/// A deadline is stored as the tick count observed when the operation was
/// called plus the wait duration, so that elapsed time is computed with
/// wrapping arithmetic and stays correct across a tick counter wrap-around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Ticks,
    duration: Ticks,
}

impl Deadline {
    /// Construct a deadline `duration` ticks after `now`. `duration ==`
    /// [`INFINITE`] produces a deadline that never expires.
    #[inline]
    pub const fn after(now: Ticks, duration: Ticks) -> Self {
        Self {
            start: now,
            duration,
        }
    }

    /// Get a flag indicating whether this deadline never expires.
    #[inline]
    pub const fn is_infinite(self) -> bool {
        self.duration == INFINITE
    }

    /// Get a flag indicating whether the deadline has been reached at tick
    /// count `now`.
    ///
    /// A wait of `W` ticks expires once at least `W` ticks have elapsed
    /// since it started, and never earlier. A zero-tick wait is expired from
    /// the start.
    #[inline]
    pub const fn has_expired(self, now: Ticks) -> bool {
        !self.is_infinite() && now.wrapping_sub(self.start) >= self.duration
    }
}

/// Convert a duration in milliseconds to ticks, rounding up so that a
/// non-zero duration never becomes a zero-tick wait. [`INFINITE`] is passed
/// through.
pub const fn ms_to_ticks<Traits: KernelCfg>(ms: u32) -> Ticks {
    if ms == INFINITE {
        INFINITE
    } else {
        let period = Traits::TICK_PERIOD_MS;
        let ticks = ms / period + (ms % period != 0) as u32;
        if ticks == INFINITE {
            INFINITE - 1
        } else {
            ticks
        }
    }
}

/// Convert a tick count to milliseconds, saturating on overflow.
/// [`INFINITE`] is passed through.
pub const fn ticks_to_ms<Traits: KernelCfg>(ticks: Ticks) -> u32 {
    if ticks == INFINITE {
        INFINITE
    } else {
        match ticks.checked_mul(Traits::TICK_PERIOD_MS) {
            Some(ms) if ms != INFINITE => ms,
            _ => INFINITE - 1,
        }
    }
}
