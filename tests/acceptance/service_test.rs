//! Calibration service acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Readers on many threads see a valid model while the service recalibrates
//! - The service recalibrates on schedule and hands the clock back on stop

use super::common::{fast_config, hardware_clock};
use cycleclock_core::CalibrationService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_service_with_concurrent_readers() {
    let config = fast_config(Duration::from_millis(20));
    let clock = hardware_clock(&config);
    let service = CalibrationService::start(clock, Duration::from_millis(5)).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reader = service.reader();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u64;
                let mut last = reader.now_ns();
                while !done.load(Ordering::Acquire) {
                    let model = reader.model();
                    assert!(model.ns_per_cycle.is_finite() && model.ns_per_cycle > 0.0);
                    let now = reader.now_ns();
                    // Piecewise-linear boundaries may overlap slightly
                    assert!(now + 10_000 >= last, "went backwards: {last} -> {now}");
                    last = now;
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(300));
    done.store(true, Ordering::Release);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    assert!(service.is_running());
    let clock = service.stop().unwrap();
    let metrics = clock.metrics();
    println!("{metrics:?}");
    assert!(metrics.calibrations >= 3, "{metrics:?}");
    assert!(metrics.skipped > 0, "{metrics:?}");
}

#[test]
fn test_service_drop_stops_thread() {
    let clock = hardware_clock(&fast_config(Duration::from_millis(20)));
    let service = CalibrationService::start(clock, Duration::from_millis(5)).unwrap();
    let reader = service.reader();
    drop(service);

    // Readers outlive the service and keep using the last model
    let first = reader.now_ns();
    assert!(reader.now_ns() >= first);
}
