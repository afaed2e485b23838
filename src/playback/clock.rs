//! Time sources for the playback scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// One reading of the active time source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Seconds on the source's timeline.
    pub now: f64,
    /// Reading came from a frame-accurate external clock.
    pub external: bool,
    /// The host is rendering offline; every frame must be consumed.
    pub exporting: bool,
}

/// Provides the current playback time.
pub trait TimeSource: Send + Sync {
    fn sample(&self) -> TimeSample;
}

/// Monotonic wall clock measured from its creation.
#[derive(Debug, Clone)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn sample(&self) -> TimeSample {
        TimeSample {
            now: self.epoch.elapsed().as_secs_f64(),
            external: false,
            exporting: false,
        }
    }
}

/// Clock driven by the host, e.g. a replay renderer stepping frame by frame.
///
/// Until a time is set it falls back to the wall clock.
#[derive(Debug, Default)]
pub struct ExternalClock {
    /// `f64` seconds as bits.
    seconds: AtomicU64,
    active: AtomicBool,
    exporting: AtomicBool,
    warned: AtomicBool,
    fallback: WallClock,
}

impl ExternalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current time in seconds and make the clock active.
    pub fn set_time(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Advance the current time by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let now = f64::from_bits(self.seconds.load(Ordering::Acquire));
        self.set_time(now + seconds);
    }

    /// Stop driving time; samples fall back to the wall clock.
    pub fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn set_exporting(&self, exporting: bool) {
        self.exporting.store(exporting, Ordering::Release);
    }
}

impl TimeSource for ExternalClock {
    fn sample(&self) -> TimeSample {
        let exporting = self.exporting.load(Ordering::Acquire);
        if self.active.load(Ordering::Acquire) {
            return TimeSample {
                now: f64::from_bits(self.seconds.load(Ordering::Acquire)),
                external: true,
                exporting,
            };
        }
        if exporting && !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!("Exporting without an external time, falling back to wall clock");
        }
        TimeSample {
            exporting,
            ..self.fallback.sample()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_monotonic() {
        let clock = WallClock::new();
        let a = clock.sample();
        let b = clock.sample();
        assert!(b.now >= a.now);
        assert!(!a.external);
    }

    #[test]
    fn test_external_clock() {
        let clock = ExternalClock::new();
        assert!(!clock.sample().external);

        clock.set_time(2.5);
        clock.set_exporting(true);
        let s = clock.sample();
        assert_eq!(s.now, 2.5);
        assert!(s.external && s.exporting);

        clock.advance(0.5);
        assert_eq!(clock.sample().now, 3.0);

        // Time may go backwards; the scheduler treats that as a rewind
        clock.set_time(1.0);
        assert_eq!(clock.sample().now, 1.0);

        clock.clear();
        let s = clock.sample();
        assert!(!s.external);
        assert!(s.exporting);
    }
}
