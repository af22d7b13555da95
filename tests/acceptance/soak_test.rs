//! Long-duration drift tracking.
//!
//! # Acceptance Criteria
//!
//! - Over a minute of one-second recalibrations, skew against the platform
//!   clock stays under 100 µs
//! - No calibration fails

use super::common::{fast_config, hardware_clock, skew_ns, SkewStats};
use cycleclock_core::MonotonicClock;
use std::thread;
use std::time::Duration;

#[test]
#[ignore = "soak test: runs for about a minute"]
fn test_drift_soak() {
    const ROUNDS: usize = 60;

    let interval = Duration::from_secs(1);
    let mut config = fast_config(interval);
    config.warmup = Duration::from_millis(200);
    let mut clock = hardware_clock(&config);
    let reference = MonotonicClock::new().unwrap();

    let mut samples = Vec::with_capacity(ROUNDS);
    for _ in 0..ROUNDS {
        thread::sleep(interval);
        clock.calibrate().unwrap();
        samples.push(skew_ns(&clock, &reference));
    }

    let stats = SkewStats::from_samples(&samples);
    stats.print("soak");
    println!("{:?}", clock.metrics());

    assert_eq!(clock.metrics().failures, 0);
    assert!(stats.min_ns.unsigned_abs() < 100_000 && stats.max_ns.unsigned_abs() < 100_000);
}
