//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building short-warm-up hardware clocks
//! - Measuring skew against the reference clock
//! - Summarizing skew samples

#![allow(dead_code)] // Not every helper is used by every test module

use cycleclock_common::ClockConfig;
use cycleclock_core::{Clock, HardwareCounter, MonotonicClock, ReferenceClock};
use std::time::Duration;

/// Hardware-backed clock.
pub type HardwareClock = Clock<HardwareCounter, MonotonicClock>;

/// Configuration with a short warm-up so tests start quickly.
pub fn fast_config(interval: Duration) -> ClockConfig {
    ClockConfig {
        warmup: Duration::from_millis(20),
        calibration_interval: interval,
        ..ClockConfig::default()
    }
}

/// Initialize a hardware clock, panicking with the error on failure.
pub fn hardware_clock(config: &ClockConfig) -> HardwareClock {
    match Clock::hardware(config) {
        Ok(clock) => clock,
        Err(e) => panic!("hardware clock failed to initialize: {e}"),
    }
}

/// `now_ns` minus the midpoint of two bracketing reference reads.
#[allow(clippy::cast_possible_wrap)]
pub fn skew_ns(clock: &HardwareClock, reference: &MonotonicClock) -> i64 {
    let before = reference.read_ns().unwrap();
    let now = clock.now_ns();
    let after = reference.read_ns().unwrap();
    let midpoint = before + (after - before) / 2;
    now.wrapping_sub(midpoint) as i64
}

/// Summary of a series of skew measurements.
#[derive(Debug, Clone, Default)]
pub struct SkewStats {
    /// Smallest skew in nanoseconds.
    pub min_ns: i64,
    /// Largest skew in nanoseconds.
    pub max_ns: i64,
    /// Median absolute skew in nanoseconds.
    pub median_abs_ns: u64,
    /// Number of samples.
    pub samples: usize,
}

impl SkewStats {
    /// Summarize samples. Returns the default for an empty slice.
    pub fn from_samples(samples: &[i64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut magnitudes: Vec<u64> = samples.iter().map(|s| s.unsigned_abs()).collect();
        magnitudes.sort_unstable();
        Self {
            min_ns: samples.iter().copied().min().unwrap_or_default(),
            max_ns: samples.iter().copied().max().unwrap_or_default(),
            median_abs_ns: magnitudes[magnitudes.len() / 2],
            samples: samples.len(),
        }
    }

    /// Print a report line for test output.
    pub fn print(&self, label: &str) {
        println!(
            "{label}: skew min {} ns, max {} ns, median |skew| {} ns over {} samples",
            self.min_ns, self.max_ns, self.median_abs_ns, self.samples
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_stats() {
        let stats = SkewStats::from_samples(&[-30, 10, 20, -5, 40]);
        assert_eq!(stats.min_ns, -30);
        assert_eq!(stats.max_ns, 40);
        assert_eq!(stats.median_abs_ns, 20);
        assert_eq!(stats.samples, 5);

        assert_eq!(SkewStats::from_samples(&[]).samples, 0);
    }
}
