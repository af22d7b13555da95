use thiserror::Error;

/// Failures reported by a platform reference-clock backend.
///
/// Every variant is terminal for the call in progress; backends never retry
/// internally. Retrying is the sampler's job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformClockError {
    /// The platform timebase could not be queried (`mach_timebase_info`).
    #[error("timebase query failed with code {code}")]
    TimebaseUnavailable {
        /// Kernel return code.
        code: i32,
    },

    /// The timebase reported a zero scale (denominator or frequency).
    #[error("reference clock timebase has a zero scale")]
    DegenerateScale,

    /// Querying the performance-counter frequency failed.
    #[error("performance frequency query failed: {0}")]
    FrequencyQueryFailed(String),

    /// Querying the performance counter failed.
    #[error("performance counter query failed: {0}")]
    CounterQueryFailed(String),

    /// Reading the monotonic clock failed.
    #[error("monotonic time read failed: {0}")]
    TimeReadFailed(String),
}

/// Failure to produce a synchronized `(cycle, reference_ns)` pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    /// Every attempt was discarded because a reference read failed.
    #[error("too many retries: {attempts} sampling attempts failed (last: {last})")]
    TooManyRetries {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: PlatformClockError,
    },
}

impl SampleError {
    /// Number of sampling attempts that were made before giving up.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::TooManyRetries { attempts, .. } => *attempts,
        }
    }
}

/// Errors raised while initializing a clock.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InitError {
    /// The supplied durations or sampling parameters are unusable.
    #[error("invalid clock configuration: {0}")]
    InvalidConfig(String),

    /// The reference clock failed outside of sampling (backend setup or
    /// a read during the warm-up wait).
    #[error("reference clock error: {0}")]
    Platform(#[from] PlatformClockError),

    /// Sampling exhausted its retry budget.
    #[error("sampling failed: {0}")]
    Sample(#[from] SampleError),

    /// The warm-up did not yield a finite, positive rate.
    #[error("degenerate warm-up: {elapsed_ns}ns over {elapsed_cycles} cycles")]
    DegenerateRate {
        /// Cycles elapsed between the two initial samples.
        elapsed_cycles: u64,
        /// Reference nanoseconds elapsed between the two initial samples.
        elapsed_ns: u64,
    },
}

impl InitError {
    /// Whether this error is the sampler's retry budget running out.
    #[must_use]
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(self, Self::Sample(SampleError::TooManyRetries { .. }))
    }
}

/// Errors raised by a recalibration attempt.
///
/// None of these are fatal: the previously published model stays in use.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrateError {
    /// Sampling exhausted its retry budget.
    #[error("sampling failed: {0}")]
    Sample(#[from] SampleError),

    /// The drift correction produced an unusable rate; nothing was published.
    #[error("drift correction produced invalid rate {ns_per_cycle} ns/cycle")]
    DegenerateRate {
        /// The rejected rate.
        ns_per_cycle: f64,
    },
}

impl CalibrateError {
    /// Whether this error is the sampler's retry budget running out.
    #[must_use]
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(self, Self::Sample(SampleError::TooManyRetries { .. }))
    }
}

/// Errors from the background calibration service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The calibration thread could not be spawned.
    #[error("failed to spawn calibration thread: {0}")]
    Spawn(String),

    /// The calibration thread panicked; the clock it owned is lost.
    #[error("calibration thread panicked")]
    Panicked,
}
