//! Clock facade.
//!
//! A [`Clock`] owns the calibrator and is the single calibration owner;
//! [`ClockReader`] handles convert cycle counts on any number of threads.

use crate::calibrator::{CalibrationOutcome, Calibrator};
use crate::counter::{CycleSource, HardwareCounter};
use crate::reference::{MonotonicClock, ReferenceClock};
use crate::state::{CalibrationModel, CalibrationState};
use cycleclock_common::config::ClockConfig;
use cycleclock_common::error::{CalibrateError, InitError};
use cycleclock_common::metrics::CalibrationMetrics;
use static_assertions::assert_impl_all;
use std::sync::Arc;

assert_impl_all!(ClockReader<HardwareCounter>: Send, Sync, Clone);
assert_impl_all!(Clock<HardwareCounter, MonotonicClock>: Send);

/// Read-only handle on a calibrated clock.
#[derive(Debug, Clone)]
pub struct ClockReader<C> {
    counter: C,
    state: Arc<CalibrationState>,
}

impl<C: CycleSource> ClockReader<C> {
    /// Current time in nanoseconds of the reference clock's epoch.
    ///
    /// Never blocks, never fails, never allocates.
    #[inline]
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        let cycle = self.counter.read_cycles();
        self.state.read().to_ns(cycle)
    }

    /// Counter frequency in cycles per nanosecond (GHz).
    #[must_use]
    pub fn current_frequency(&self) -> f64 {
        self.state.read().frequency()
    }

    /// Counter frequency in Hz.
    #[must_use]
    pub fn frequency_hz(&self) -> f64 {
        self.current_frequency() * 1e9
    }

    /// Snapshot of the published model.
    #[must_use]
    pub fn model(&self) -> CalibrationModel {
        self.state.read()
    }
}

/// A calibrated cycle-counter clock.
#[derive(Debug)]
pub struct Clock<C, R> {
    reader: ClockReader<C>,
    calibrator: Calibrator<C, R>,
}

impl Clock<HardwareCounter, MonotonicClock> {
    /// Initialize a clock on the hardware counter against the platform's
    /// monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Platform`] if the platform clock cannot be set
    /// up, otherwise as [`Clock::from_config`].
    pub fn hardware(config: &ClockConfig) -> Result<Self, InitError> {
        Self::from_config(HardwareCounter::new(), MonotonicClock::new()?, config)
    }
}

impl<C: CycleSource + Clone, R: ReferenceClock> Clock<C, R> {
    /// Initialize with the two tunables and default sampling settings.
    ///
    /// Blocks (yield-polling the reference clock) for about `warmup_ns`.
    ///
    /// # Errors
    ///
    /// See [`Calibrator::initialize`].
    pub fn initialize(
        counter: C,
        reference: R,
        warmup_ns: u64,
        interval_ns: u64,
    ) -> Result<Self, InitError> {
        Self::from_config(
            counter,
            reference,
            &ClockConfig::from_nanos(warmup_ns, interval_ns),
        )
    }

    /// Initialize with a full configuration.
    ///
    /// # Errors
    ///
    /// See [`Calibrator::initialize`].
    pub fn from_config(counter: C, reference: R, config: &ClockConfig) -> Result<Self, InitError> {
        let state = Arc::new(CalibrationState::new());
        let reader = ClockReader {
            counter: counter.clone(),
            state: Arc::clone(&state),
        };
        let calibrator = Calibrator::initialize(counter, reference, state, config)?;
        Ok(Self { reader, calibrator })
    }

    /// Current time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.reader.now_ns()
    }

    /// Recalibrate if due.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrateError`] if sampling failed; the previous model
    /// stays in use.
    pub fn calibrate(&mut self) -> Result<CalibrationOutcome, CalibrateError> {
        self.calibrator.maybe_calibrate()
    }

    /// Counter frequency in cycles per nanosecond (GHz).
    #[must_use]
    pub fn current_frequency(&self) -> f64 {
        self.reader.current_frequency()
    }

    /// Counter frequency in Hz.
    #[must_use]
    pub fn frequency_hz(&self) -> f64 {
        self.reader.frequency_hz()
    }

    /// Snapshot of the published model.
    #[must_use]
    pub fn model(&self) -> CalibrationModel {
        self.reader.model()
    }

    /// A new handle for reading this clock from other threads.
    #[must_use]
    pub fn reader(&self) -> ClockReader<C> {
        self.reader.clone()
    }

    /// The calibrator, for drift bookkeeping.
    #[must_use]
    pub fn calibrator(&self) -> &Calibrator<C, R> {
        &self.calibrator
    }

    /// Recalibration statistics.
    #[must_use]
    pub fn metrics(&self) -> &CalibrationMetrics {
        self.calibrator.metrics()
    }
}
