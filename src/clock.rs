//! Monotonic time source for TDMA scheduling.
//!
//! All slot/frame math in [`crate::tdma`] reads time exclusively through
//! [`Clock::now`]. In production this would be anchored to the radio
//! front-end's internal sample counter (via [`crate::transport::IqTransport::time_now`]);
//! absent that, it falls back to the process's monotonic clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Second count, double precision, matching the original system's clock API.
pub type Seconds = f64;

/// A monotonic clock anchored at construction time.
///
/// `now()` returns seconds elapsed since the clock was created. Cloning a
/// `Clock` shares the same epoch.
#[derive(Clone)]
pub struct Clock {
    epoch: Instant,
    /// Source-specific offset (e.g. radio counter vs. system clock), in
    /// nanoseconds, for diagnostic logging only.
    offset_nanos: std::sync::Arc<AtomicU64>,
}

impl Clock {
    /// Create a new clock anchored to the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_nanos: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seconds elapsed since this clock was created.
    pub fn now(&self) -> Seconds {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Record the offset (in seconds) between the radio front-end's counter
    /// and system monotonic time, for diagnostics only; does not affect
    /// `now()`.
    pub fn record_offset(&self, offset_secs: f64) {
        self.offset_nanos
            .store((offset_secs * 1e9) as u64, Ordering::Relaxed);
    }

    /// Last recorded offset between the radio counter and system time.
    pub fn offset_from_system(&self) -> f64 {
        self.offset_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic_and_nonnegative() {
        let clock = Clock::new();
        let t0 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = clock.now();
        assert!(t1 >= t0);
        assert!(t0 >= 0.0);
    }

    #[test]
    fn offset_round_trips() {
        let clock = Clock::new();
        clock.record_offset(0.25);
        assert!((clock.offset_from_system() - 0.25).abs() < 1e-6);
    }
}
