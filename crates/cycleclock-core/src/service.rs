//! Background calibration owner.
//!
//! [`CalibrationService`] moves a [`Clock`] onto a dedicated thread that
//! runs the due check every poll interval. Because the thread owns the
//! clock, there is exactly one calibration in flight at any time; other
//! threads read through [`ClockReader`] handles.

use crate::clock::{Clock, ClockReader};
use crate::counter::CycleSource;
use crate::reference::ReferenceClock;
use cycleclock_common::error::ServiceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Thread name of the calibration loop.
pub const THREAD_NAME: &str = "cycleclock-calibrator";

/// Runs recalibration on a dedicated thread.
#[derive(Debug)]
pub struct CalibrationService<C, R> {
    reader: ClockReader<C>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<Clock<C, R>>>,
}

impl<C, R> CalibrationService<C, R>
where
    C: CycleSource + Clone + 'static,
    R: ReferenceClock + 'static,
{
    /// Start calibrating `clock` every `poll_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`] if the thread cannot be created.
    pub fn start(clock: Clock<C, R>, poll_interval: Duration) -> Result<Self, ServiceError> {
        let reader = clock.reader();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_requested);

        // Clamp to avoid a spin
        let poll_interval = poll_interval.max(Duration::from_micros(100));

        info!(
            poll_interval_ms = poll_interval.as_millis(),
            "Starting calibration service"
        );

        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || calibration_loop(clock, &stop, poll_interval))
            .map_err(|e| ServiceError::Spawn(e.to_string()))?;

        Ok(Self {
            reader,
            stop_requested,
            handle: Some(handle),
        })
    }
}

impl<C, R> CalibrationService<C, R> {
    /// A new handle for reading the clock.
    #[must_use]
    pub fn reader(&self) -> ClockReader<C>
    where
        C: Clone,
    {
        self.reader.clone()
    }

    /// Whether the calibration thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and take the clock back.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Panicked`] if the calibration thread panicked.
    pub fn stop(mut self) -> Result<Clock<C, R>, ServiceError> {
        self.shutdown().ok_or(ServiceError::Panicked)
    }

    fn shutdown(&mut self) -> Option<Clock<C, R>> {
        let handle = self.handle.take()?;
        info!("Stopping calibration service");
        self.stop_requested.store(true, Ordering::Release);
        handle.thread().unpark();
        match handle.join() {
            Ok(clock) => Some(clock),
            Err(e) => {
                warn!("Calibration thread panicked: {:?}", e);
                None
            }
        }
    }
}

impl<C, R> Drop for CalibrationService<C, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn calibration_loop<C, R>(
    mut clock: Clock<C, R>,
    stop: &AtomicBool,
    poll_interval: Duration,
) -> Clock<C, R>
where
    C: CycleSource + Clone,
    R: ReferenceClock,
{
    debug!("Calibration thread started");

    while !stop.load(Ordering::Acquire) {
        if let Err(e) = clock.calibrate() {
            warn!(error = %e, "Calibration failed; keeping previous model");
        }
        thread::park_timeout(poll_interval);
    }

    debug!("Calibration thread stopped");
    clock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedTimeline;

    #[test]
    fn test_service_calibrates_and_returns_clock() {
        let timeline = SimulatedTimeline::new(0.5, 0, 0, 200);
        let clock = Clock::initialize(
            timeline.counter(),
            timeline.reference(),
            1_000_000,
            10_000_000,
        )
        .unwrap();

        let before = clock.model();

        let service = CalibrationService::start(clock, Duration::from_millis(1)).unwrap();
        assert!(service.is_running());
        let reader = service.reader();

        // Make a recalibration due and wait for the thread to pick it up
        timeline.advance_ns(20_000_000);
        let start = std::time::Instant::now();
        while reader.model() == before && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        let clock = service.stop().unwrap();
        assert_eq!(clock.metrics().calibrations, 1);
        assert_eq!(reader.model(), clock.model());
        assert_ne!(clock.model(), before);
    }

    #[test]
    fn test_service_survives_failing_reference() {
        let timeline = SimulatedTimeline::new(0.5, 0, 0, 200);
        let reference = timeline.reference();
        let clock = Clock::initialize(timeline.counter(), reference.clone(), 1_000_000, 10_000_000)
            .unwrap();
        let before = clock.model();

        reference.fail_all_reads(true);
        timeline.advance_ns(20_000_000);

        let service = CalibrationService::start(clock, Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(service.is_running());

        let clock = service.stop().unwrap();
        assert!(clock.metrics().failures >= 1);
        assert_eq!(clock.model(), before);
    }
}
