//! Synchronized cycle/reference sampling.
//!
//! A sample interleaves `N + 1` cycle reads with `N` reference reads:
//!
//! ```text
//! cycle[0]  ref[1]  cycle[1]  ref[2]  cycle[2]  ...  ref[N]  cycle[N]
//! ```
//!
//! Each reference read is bracketed by two cycle reads. The tightest
//! bracket is the one least disturbed by preemption or cache misses, so
//! its midpoint cycle is paired with its reference value.

use crate::counter::CycleSource;
use crate::reference::ReferenceClock;
use cycleclock_common::config::{SamplingConfig, DEFAULT_SAMPLE_BRACKETS, MAX_SAMPLE_BRACKETS};
use cycleclock_common::error::{PlatformClockError, SampleError};
use static_assertions::const_assert;
use tracing::warn;

const_assert!(DEFAULT_SAMPLE_BRACKETS >= 1);
const_assert!(DEFAULT_SAMPLE_BRACKETS <= MAX_SAMPLE_BRACKETS);

/// A cycle count and the reference time observed at that cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    /// Midpoint of the tightest bracket.
    pub cycle: u64,
    /// Reference nanoseconds read inside that bracket.
    pub reference_ns: u64,
}

/// Produces low-jitter [`SyncSample`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSampler {
    brackets: usize,
    max_retries: u32,
}

impl Default for SyncSampler {
    fn default() -> Self {
        Self::from_config(&SamplingConfig::default())
    }
}

impl SyncSampler {
    /// Create a sampler.
    ///
    /// `brackets` is clamped to `1..=MAX_SAMPLE_BRACKETS` and
    /// `max_retries` to at least 1.
    #[must_use]
    pub fn new(brackets: usize, max_retries: u32) -> Self {
        Self {
            brackets: brackets.clamp(1, MAX_SAMPLE_BRACKETS),
            max_retries: max_retries.max(1),
        }
    }

    /// Create a sampler from configuration.
    #[must_use]
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::new(config.brackets, config.max_retries)
    }

    /// Reference reads per attempt.
    #[must_use]
    pub fn brackets(&self) -> usize {
        self.brackets
    }

    /// Attempts before giving up.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Take one synchronized sample.
    ///
    /// An attempt is discarded as soon as any reference read fails; a fresh
    /// attempt then starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::TooManyRetries`] after `max_retries` failed
    /// attempts.
    pub fn sample<C, R>(&self, counter: &C, reference: &R) -> Result<SyncSample, SampleError>
    where
        C: CycleSource + ?Sized,
        R: ReferenceClock + ?Sized,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_sample(counter, reference) {
                Ok(sample) => return Ok(sample),
                Err(last) if attempt >= self.max_retries => {
                    return Err(SampleError::TooManyRetries {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Discarding sample: reference read failed"
                    );
                }
            }
        }
    }

    fn try_sample<C, R>(&self, counter: &C, reference: &R) -> Result<SyncSample, PlatformClockError>
    where
        C: CycleSource + ?Sized,
        R: ReferenceClock + ?Sized,
    {
        let n = self.brackets;
        let mut cycles = [0u64; MAX_SAMPLE_BRACKETS + 1];
        let mut refs = [0u64; MAX_SAMPLE_BRACKETS + 1];

        cycles[0] = counter.read_cycles();
        for i in 1..=n {
            refs[i] = reference.read_ns()?;
            cycles[i] = counter.read_cycles();
        }

        Ok(select_bracket(&cycles[..=n], &refs[..=n]))
    }
}

/// Pick the tightest bracket among the candidates.
///
/// `cycles` has one more entry than there are brackets; `refs[0]` is unused.
/// A reference value equal to its predecessor means the clock did not tick
/// inside that bracket, so only the first read of each distinct value is a
/// candidate.
fn select_bracket(cycles: &[u64], refs: &[u64]) -> SyncSample {
    debug_assert!(cycles.len() >= 2 && cycles.len() == refs.len());

    let mut best = 1;
    let mut best_width = u64::MAX;
    for i in 1..cycles.len() {
        if i > 1 && refs[i] == refs[i - 1] {
            continue;
        }
        let width = cycles[i].wrapping_sub(cycles[i - 1]);
        if width < best_width {
            best = i;
            best_width = width;
        }
    }

    SyncSample {
        cycle: cycles[best - 1].wrapping_add(best_width / 2),
        reference_ns: refs[best],
    }
}
