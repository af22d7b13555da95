//! Hardware clock acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Successive `now_ns` reads on one thread never go backwards
//! - Right after initialization the clock is within 2 ms of the platform clock
//! - Elapsed time agrees with the platform clock over a sleep
//! - A due calibration publishes a new model

use super::common::{fast_config, hardware_clock, skew_ns, SkewStats};
use cycleclock_core::{CalibrationOutcome, HardwareCounter, MonotonicClock, ReferenceClock};
use std::thread;
use std::time::{Duration, Instant};

const MAX_SKEW_NS: u64 = 2_000_000;

#[test]
fn test_now_ns_is_monotonic() {
    let clock = hardware_clock(&fast_config(Duration::from_secs(1)));

    let mut last = clock.now_ns();
    for _ in 0..1_000_000 {
        let now = clock.now_ns();
        assert!(now >= last, "clock went backwards: {last} -> {now}");
        last = now;
    }
}

#[test]
fn test_skew_after_init() {
    let clock = hardware_clock(&fast_config(Duration::from_secs(1)));
    let reference = MonotonicClock::new().unwrap();

    let samples: Vec<i64> = (0..1_000).map(|_| skew_ns(&clock, &reference)).collect();
    let stats = SkewStats::from_samples(&samples);
    stats.print(HardwareCounter::SOURCE);

    assert!(
        stats.median_abs_ns < MAX_SKEW_NS,
        "median skew {} ns exceeds {MAX_SKEW_NS} ns",
        stats.median_abs_ns
    );
}

#[test]
fn test_elapsed_matches_reference() {
    let clock = hardware_clock(&fast_config(Duration::from_secs(1)));
    let reference = MonotonicClock::new().unwrap();

    let clock_start = clock.now_ns();
    let reference_start = reference.read_ns().unwrap();
    thread::sleep(Duration::from_millis(100));
    let clock_elapsed = clock.now_ns() - clock_start;
    let reference_elapsed = reference.read_ns().unwrap() - reference_start;

    // 1% of the span, plus read jitter
    let tolerance = reference_elapsed / 100 + 100_000;
    assert!(
        clock_elapsed.abs_diff(reference_elapsed) < tolerance,
        "clock {clock_elapsed} ns vs reference {reference_elapsed} ns"
    );
}

#[test]
fn test_calibration_on_live_clock() {
    let interval = Duration::from_millis(200);
    let mut clock = hardware_clock(&fast_config(interval));
    let before = clock.model();

    assert_eq!(clock.calibrate().unwrap(), CalibrationOutcome::NotDue);

    thread::sleep(interval);
    let outcome = clock.calibrate().unwrap();
    let CalibrationOutcome::Recalibrated(report) = outcome else {
        panic!("calibration was due, got {outcome:?}");
    };
    println!(
        "observed error {} ns, projected {} ns, {:.6} GHz",
        report.observed_error_ns,
        report.projected_error_ns,
        report.model.frequency()
    );

    assert!(report.model.base_cycle > before.base_cycle);
    assert!(report.observed_error_ns.unsigned_abs() < MAX_SKEW_NS);
    assert_eq!(clock.model(), report.model);
    assert!(clock.frequency_hz() > 0.0);
}

#[test]
fn test_now_ns_is_cheap() {
    const READS: u32 = 1_000_000;

    let clock = hardware_clock(&fast_config(Duration::from_secs(1)));

    let start = Instant::now();
    let mut sink = 0u64;
    for _ in 0..READS {
        sink = sink.wrapping_add(clock.now_ns());
    }
    let per_read = start.elapsed() / READS;
    println!("now_ns: {per_read:?} per read (sink {sink})");

    // Generous: even debug builds under emulation stay far below this
    assert!(
        per_read < Duration::from_micros(20),
        "{per_read:?} per read"
    );
}
