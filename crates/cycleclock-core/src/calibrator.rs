//! Model initialization and drift-correcting recalibration.
//!
//! # Initialization
//!
//! Two synchronized samples taken `warmup` apart give the initial rate.
//! The wait between them polls the reference clock and yields; it never
//! sleeps on a timer.
//!
//! # Drift correction
//!
//! At each due recalibration a fresh sample `(cycle, reference_ns)` is
//! compared with the model's projection of `cycle`:
//!
//! ```text
//! observed   = predicted_ns - reference_ns
//! elapsed    = reference_ns - base_ns + previous_error
//! growth     = (observed - previous_error) * interval
//! projected  = observed + growth / elapsed
//! rate'      = rate * (1 - projected / interval)
//! ```
//!
//! The new model is anchored at `(cycle, predicted_ns)`, so the published
//! timeline never jumps; the rate change alone steers the error expected
//! at the next calibration back towards zero. The controller is
//! proportional only.
//!
//! # Resynchronization
//!
//! A correction that yields a non-finite or non-positive rate is rejected
//! and nothing is published. This happens when the model leads the
//! reference by more than an interval, e.g. after the reference clock
//! paused while the counter kept running. The rejected sample becomes the
//! start of a fresh rate measurement, and each following due calibration:
//!
//! - re-measures the rate from the previous sample,
//! - steps forward onto the reference if the model is behind it,
//! - otherwise keeps the model's timeline and runs slow, at no less than
//!   [`MIN_SLEW_FACTOR`] of the measured rate, until the lead is absorbed.
//!
//! Published time therefore never moves backwards.

use crate::counter::CycleSource;
use crate::reference::ReferenceClock;
use crate::sampler::{SyncSample, SyncSampler};
use crate::state::{CalibrationModel, CalibrationState};
use cycleclock_common::config::ClockConfig;
use cycleclock_common::error::{CalibrateError, InitError};
use cycleclock_common::metrics::CalibrationMetrics;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// The next calibration is scheduled this much before the interval ends.
const SCHEDULE_LEAD_NS: u64 = 1_000;

/// Slowest rate, relative to the measured one, used to absorb a lead.
pub const MIN_SLEW_FACTOR: f64 = 0.5;

/// Calibrator-private drift bookkeeping. Never read concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftTracking {
    /// Model minus reference at the last calibration (0 after init).
    pub reference_ns_error: i64,
    /// Cycle count from which recalibration is due.
    pub next_calibration_cycle: u64,
    /// Target spacing between calibrations.
    pub calibration_interval_ns: u64,
    /// Start of the rate measurement while resynchronizing.
    pub resync_from: Option<SyncSample>,
}

impl DriftTracking {
    /// Whether the next due calibration re-measures the rate instead of
    /// correcting it.
    #[must_use]
    pub fn is_resynchronizing(&self) -> bool {
        self.resync_from.is_some()
    }
}

/// Result of a successful due check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// Not due yet; nothing changed.
    NotDue,
    /// A new model was published.
    Recalibrated(CalibrationReport),
}

impl CalibrationOutcome {
    /// Whether a new model was published.
    #[must_use]
    pub fn is_recalibrated(&self) -> bool {
        matches!(self, Self::Recalibrated(_))
    }
}

/// Details of a published recalibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationReport {
    /// The synchronized sample the correction was computed from.
    pub sample: SyncSample,
    /// Model minus reference at the sample.
    pub observed_error_ns: i64,
    /// Error expected at the next calibration had the rate not changed.
    pub projected_error_ns: i64,
    /// The newly published model.
    pub model: CalibrationModel,
    /// Cycle count from which the next recalibration is due.
    pub next_calibration_cycle: u64,
}

/// Sole writer of a [`CalibrationState`].
#[derive(Debug)]
pub struct Calibrator<C, R> {
    counter: C,
    reference: R,
    sampler: SyncSampler,
    state: Arc<CalibrationState>,
    drift: DriftTracking,
    metrics: CalibrationMetrics,
}

impl<C: CycleSource, R: ReferenceClock> Calibrator<C, R> {
    /// Seed the initial rate and publish the first model into `state`.
    ///
    /// # Errors
    ///
    /// - [`InitError::InvalidConfig`] if `config` fails validation.
    /// - [`InitError::Sample`] if either sample exhausts its retries.
    /// - [`InitError::Platform`] if a reference read fails during warm-up.
    /// - [`InitError::DegenerateRate`] if the counter did not advance.
    #[allow(clippy::cast_precision_loss)]
    pub fn initialize(
        counter: C,
        reference: R,
        state: Arc<CalibrationState>,
        config: &ClockConfig,
    ) -> Result<Self, InitError> {
        config
            .validate()
            .map_err(|e| InitError::InvalidConfig(e.to_string()))?;

        let sampler = SyncSampler::from_config(&config.sampling);
        let warmup_ns = config.warmup_ns();
        let interval_ns = config.calibration_interval_ns();

        let base = sampler.sample(&counter, &reference)?;

        let expire_ns = base.reference_ns.saturating_add(warmup_ns);
        while reference.read_ns()? < expire_ns {
            std::thread::yield_now();
        }

        let delayed = sampler.sample(&counter, &reference)?;

        let elapsed_cycles = delayed.cycle.wrapping_sub(base.cycle);
        let elapsed_ns = delayed.reference_ns.saturating_sub(base.reference_ns);
        let model = CalibrationModel {
            base_cycle: base.cycle,
            base_ns: base.reference_ns,
            ns_per_cycle: elapsed_ns as f64 / elapsed_cycles as f64,
        };
        if elapsed_cycles == 0 || !model.is_valid() {
            return Err(InitError::DegenerateRate {
                elapsed_cycles,
                elapsed_ns,
            });
        }

        state.publish(model);

        let drift = DriftTracking {
            reference_ns_error: 0,
            next_calibration_cycle: schedule_next(base.cycle, interval_ns, model.ns_per_cycle),
            calibration_interval_ns: interval_ns,
            resync_from: None,
        };

        info!(
            ns_per_cycle = model.ns_per_cycle,
            frequency_ghz = model.frequency(),
            warmup_ns,
            interval_ns,
            "Cycle clock initialized"
        );

        Ok(Self {
            counter,
            reference,
            sampler,
            state,
            drift,
            metrics: CalibrationMetrics::new(),
        })
    }

    /// Recalibrate if due.
    ///
    /// Returns [`CalibrationOutcome::NotDue`] without sampling while the
    /// counter is below the scheduled cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrateError`] if sampling fails or the correction is
    /// unusable. The published model is left untouched in both cases; an
    /// unusable correction also starts resynchronization.
    pub fn maybe_calibrate(&mut self) -> Result<CalibrationOutcome, CalibrateError> {
        let now = self.counter.read_cycles();
        if now < self.drift.next_calibration_cycle {
            self.metrics.record_skip();
            trace!(
                now,
                next_calibration_cycle = self.drift.next_calibration_cycle,
                "Calibration not due"
            );
            return Ok(CalibrationOutcome::NotDue);
        }

        match self.recalibrate() {
            Ok(report) => {
                self.metrics.record(report.observed_error_ns);
                Ok(CalibrationOutcome::Recalibrated(report))
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    fn recalibrate(&mut self) -> Result<CalibrationReport, CalibrateError> {
        let sample = self.sampler.sample(&self.counter, &self.reference)?;
        let current = self.state.read();
        let interval_ns = self.drift.calibration_interval_ns;

        let correction = match self.drift.resync_from {
            Some(from) => resync(&current, from, sample, interval_ns),
            None => correct_drift(&current, sample, &self.drift),
        };
        let correction = match correction {
            Ok(correction) => correction,
            Err(e) => {
                self.drift.resync_from = Some(sample);
                self.drift.reference_ns_error = 0;
                self.drift.next_calibration_cycle =
                    schedule_next(sample.cycle, interval_ns, current.ns_per_cycle);
                warn!(
                    error = %e,
                    cycle = sample.cycle,
                    reference_ns = sample.reference_ns,
                    "Rate correction rejected, resynchronizing"
                );
                return Err(e);
            }
        };

        self.state.publish(correction.model);
        self.drift.reference_ns_error = correction.reference_ns_error;
        self.drift.next_calibration_cycle =
            schedule_next(sample.cycle, interval_ns, correction.schedule_rate);
        self.drift.resync_from = correction.resync_from;

        debug!(
            observed_error_ns = correction.observed_error,
            projected_error_ns = correction.projected_error,
            ns_per_cycle = correction.model.ns_per_cycle,
            next_calibration_cycle = self.drift.next_calibration_cycle,
            resynchronizing = self.drift.is_resynchronizing(),
            "Recalibrated"
        );

        Ok(CalibrationReport {
            sample,
            observed_error_ns: correction.observed_error,
            projected_error_ns: correction.projected_error,
            model: correction.model,
            next_calibration_cycle: self.drift.next_calibration_cycle,
        })
    }

    /// Drift bookkeeping.
    #[must_use]
    pub fn drift(&self) -> &DriftTracking {
        &self.drift
    }

    /// Recalibration statistics.
    #[must_use]
    pub fn metrics(&self) -> &CalibrationMetrics {
        &self.metrics
    }

    /// The published model.
    #[must_use]
    pub fn model(&self) -> CalibrationModel {
        self.state.read()
    }

    /// The state this calibrator publishes into.
    #[must_use]
    pub fn state(&self) -> &Arc<CalibrationState> {
        &self.state
    }

    /// The reference clock.
    #[must_use]
    pub fn reference(&self) -> &R {
        &self.reference
    }
}

/// A model ready to publish, with the bookkeeping that goes with it.
struct Correction {
    model: CalibrationModel,
    observed_error: i64,
    projected_error: i64,
    /// Model minus reference at the sample, on the new model's timeline.
    reference_ns_error: i64,
    /// Rate the next calibration is scheduled with.
    schedule_rate: f64,
    resync_from: Option<SyncSample>,
}

#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
fn correct_drift(
    current: &CalibrationModel,
    sample: SyncSample,
    drift: &DriftTracking,
) -> Result<Correction, CalibrateError> {
    let predicted_ns = current.to_ns(sample.cycle);
    let previous_error = drift.reference_ns_error;
    let interval_ns = drift.calibration_interval_ns as i64;

    let observed_error = predicted_ns.wrapping_sub(sample.reference_ns) as i64;
    let elapsed_ns =
        (sample.reference_ns.wrapping_sub(current.base_ns) as i64).wrapping_add(previous_error);
    let growth =
        (i128::from(observed_error) - i128::from(previous_error)) * i128::from(interval_ns);
    let projected_error = if elapsed_ns > 0 {
        let projected = i128::from(observed_error) + growth / i128::from(elapsed_ns);
        projected.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    } else {
        observed_error
    };

    let ns_per_cycle = current.ns_per_cycle * (1.0 - projected_error as f64 / interval_ns as f64);
    let model = CalibrationModel {
        base_cycle: sample.cycle,
        base_ns: predicted_ns,
        ns_per_cycle,
    };
    if !model.is_valid() {
        return Err(CalibrateError::DegenerateRate { ns_per_cycle });
    }

    Ok(Correction {
        model,
        observed_error,
        projected_error,
        reference_ns_error: observed_error,
        schedule_rate: ns_per_cycle,
        resync_from: None,
    })
}

/// Re-measure the rate since `from` and re-anchor without moving backwards.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn resync(
    current: &CalibrationModel,
    from: SyncSample,
    sample: SyncSample,
    interval_ns: u64,
) -> Result<Correction, CalibrateError> {
    let elapsed_cycles = sample.cycle.wrapping_sub(from.cycle);
    let elapsed_ns = sample.reference_ns.saturating_sub(from.reference_ns);
    let measured = elapsed_ns as f64 / elapsed_cycles as f64;
    if elapsed_cycles == 0 || !(measured.is_finite() && measured > 0.0) {
        return Err(CalibrateError::DegenerateRate {
            ns_per_cycle: measured,
        });
    }

    let predicted_ns = current.to_ns(sample.cycle);
    let observed_error = predicted_ns.wrapping_sub(sample.reference_ns) as i64;

    if observed_error <= 0 {
        return Ok(Correction {
            model: CalibrationModel {
                base_cycle: sample.cycle,
                base_ns: sample.reference_ns,
                ns_per_cycle: measured,
            },
            observed_error,
            projected_error: 0,
            reference_ns_error: 0,
            schedule_rate: measured,
            resync_from: None,
        });
    }

    let factor = (1.0 - observed_error as f64 / interval_ns as f64).max(MIN_SLEW_FACTOR);
    Ok(Correction {
        model: CalibrationModel {
            base_cycle: sample.cycle,
            base_ns: predicted_ns,
            ns_per_cycle: measured * factor,
        },
        observed_error,
        projected_error: observed_error,
        reference_ns_error: observed_error,
        schedule_rate: measured,
        // Still absorbing at the slowest rate
        resync_from: (factor <= MIN_SLEW_FACTOR).then_some(sample),
    })
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn schedule_next(cycle: u64, interval_ns: u64, ns_per_cycle: f64) -> u64 {
    let lead = interval_ns.saturating_sub(SCHEDULE_LEAD_NS);
    cycle.saturating_add((lead as f64 / ns_per_cycle) as u64)
}
