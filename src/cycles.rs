//! Monotonic cycle counter.
//!
//! All scheduling decisions (SLO scores, preemption timers, task ages)
//! are made in cycles of this counter. On x86_64 it reads the TSC
//! directly; elsewhere it falls back to a monotonic-nanosecond clock,
//! in which case "cycles" are simply nanoseconds. The engine calibrates
//! the cycle rate once at bring-up and converts every configured
//! nanosecond quantity into cycles up front, so the hot loops never do
//! unit conversions.

use std::time::{Duration, Instant};

/// Current value of the cycle counter.
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn now() -> u64 {
    // Plain RDTSC. All comparisons happen on the thread that took the
    // reference timestamp, so TSC offsets between sockets don't bite.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn now() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Measured rate of the cycle counter.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    cycles_per_ns: f64,
}

impl Calibration {
    /// Measure the counter against the wall clock.
    ///
    /// Spends a few milliseconds spinning. Called once from engine
    /// bring-up, never on the data path.
    pub fn measure() -> Calibration {
        const WINDOW: Duration = Duration::from_millis(5);
        let wall = Instant::now();
        let start = now();
        while wall.elapsed() < WINDOW {
            std::hint::spin_loop();
        }
        let cycles = now().wrapping_sub(start);
        let ns = wall.elapsed().as_nanos() as f64;
        Calibration {
            cycles_per_ns: cycles as f64 / ns,
        }
    }

    /// A fixed 1 cycle == 1 ns rate, for tests that need determinism.
    pub fn identity() -> Calibration {
        Calibration { cycles_per_ns: 1.0 }
    }

    #[inline]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (ns as f64 * self.cycles_per_ns) as u64
    }

    #[inline]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 / self.cycles_per_ns) as u64
    }

    #[inline]
    pub fn cycles_per_ns(&self) -> f64 {
        self.cycles_per_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic() {
        let mut prev = now();
        for _ in 0..1000 {
            let cur = now();
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn calibration_round_trips() {
        let cal = Calibration::measure();
        assert!(cal.cycles_per_ns() > 0.0);
        let ns = 1_000_000;
        let back = cal.cycles_to_ns(cal.ns_to_cycles(ns));
        // Within 1% of the original figure.
        assert!((back as i64 - ns as i64).unsigned_abs() < ns / 100);
    }
}
