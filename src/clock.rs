//! Monotonic clock
//!
//! Single source of truth for timestamps used throughout the exchange.
//! Never call `SystemTime::now()` directly from book/matching/strategy code —
//! go through a `Clock` so tests can drive time deterministically.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch. i64 gives ~292 years of range.
pub type Nanos = i64;

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A clock that can be backed by wall time or, in tests, a fixed/advancing
/// counter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Nanos;
}

/// Real wall-clock time, nanosecond resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    #[inline]
    fn now(&self) -> Nanos {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as Nanos)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests: starts at a fixed time and only moves
/// forward when explicitly told to.
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Nanos) -> Self {
        Self {
            current: AtomicI64::new(start),
        }
    }

    pub fn advance_to(&self, new_time: Nanos) {
        debug_assert!(new_time >= self.current.load(Ordering::SeqCst));
        self.current.store(new_time, Ordering::SeqCst);
    }

    pub fn advance_by(&self, delta: Nanos) {
        debug_assert!(delta >= 0);
        self.current.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Nanos {
        self.current.load(Ordering::SeqCst)
    }
}

/// Render a nanosecond timestamp as `secs.nanos` for logs.
pub fn display_nanos(n: Nanos) -> impl fmt::Display {
    struct D(Nanos);
    impl fmt::Display for D {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}.{:09}s", self.0 / NANOS_PER_SEC, self.0 % NANOS_PER_SEC)
        }
    }
    D(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_forward_only() {
        let clock = ManualClock::new(1_000_000_000);
        assert_eq!(clock.now(), 1_000_000_000);
        clock.advance_by(500_000_000);
        assert_eq!(clock.now(), 1_500_000_000);
        clock.advance_to(2_000_000_000);
        assert_eq!(clock.now(), 2_000_000_000);
    }

    #[test]
    #[should_panic]
    fn manual_clock_panics_on_backward_advance() {
        let clock = ManualClock::new(1_000_000_000);
        clock.advance_to(500_000_000);
    }
}
