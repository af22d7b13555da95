//! Calibration metrics for drift monitoring.
//!
//! Tracks how far the published model had drifted from the reference
//! clock at each recalibration. Recording never allocates.

use serde::Serialize;

/// Running statistics over recalibrations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationMetrics {
    /// Recalibrations that published a new model.
    pub calibrations: u64,
    /// Due checks that found nothing to do.
    pub skipped: u64,
    /// Recalibration attempts that failed.
    pub failures: u64,
    /// Most recent observed error (model minus reference) in nanoseconds.
    pub last_error_ns: Option<i64>,
    /// Minimum observed error in nanoseconds.
    pub min_error_ns: Option<i64>,
    /// Maximum observed error in nanoseconds.
    pub max_error_ns: Option<i64>,
    /// Sum of observed errors for mean calculation.
    #[serde(skip)]
    sum_error_ns: i128,
    /// Sum of absolute observed errors.
    #[serde(skip)]
    sum_abs_error_ns: u128,
}

impl CalibrationMetrics {
    /// Create empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the observed error of a published recalibration.
    pub fn record(&mut self, observed_error_ns: i64) {
        self.calibrations += 1;
        self.last_error_ns = Some(observed_error_ns);
        self.min_error_ns = Some(
            self.min_error_ns
                .map_or(observed_error_ns, |min| min.min(observed_error_ns)),
        );
        self.max_error_ns = Some(
            self.max_error_ns
                .map_or(observed_error_ns, |max| max.max(observed_error_ns)),
        );
        self.sum_error_ns += i128::from(observed_error_ns);
        self.sum_abs_error_ns += u128::from(observed_error_ns.unsigned_abs());
    }

    /// Record a due check that was a no-op.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Record a failed recalibration attempt.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Mean observed error.
    #[must_use]
    pub fn mean_error_ns(&self) -> Option<i64> {
        if self.calibrations == 0 {
            return None;
        }
        i64::try_from(self.sum_error_ns / i128::from(self.calibrations)).ok()
    }

    /// Mean magnitude of the observed error.
    #[must_use]
    pub fn mean_abs_error_ns(&self) -> Option<u64> {
        if self.calibrations == 0 {
            return None;
        }
        u64::try_from(self.sum_abs_error_ns / u128::from(self.calibrations)).ok()
    }

    /// Peak-to-peak spread of the observed error.
    #[must_use]
    pub fn error_spread_ns(&self) -> Option<i64> {
        match (self.min_error_ns, self.max_error_ns) {
            (Some(min), Some(max)) => Some(max.saturating_sub(min)),
            _ => None,
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
