//! Deterministic simulated time sources.
//!
//! A [`SimulatedTimeline`] owns one virtual cycle counter. Every read of the
//! counter or the reference clock advances it by a fixed step, so sampling
//! and warm-up waits make progress without real time passing. The reference
//! clock is linear in the counter:
//!
//! ```text
//! reference_ns = anchor_ns + (cycles - anchor_cycle) * ns_per_cycle
//! ```
//!
//! Changing the rate re-anchors at the current cycle, so the reference
//! stays continuous while its slope changes (a simulated drift).

use crate::counter::CycleSource;
use crate::reference::ReferenceClock;
use cycleclock_common::error::PlatformClockError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ReferenceModel {
    anchor_cycle: u64,
    anchor_ns: u64,
    ns_per_cycle: f64,
    /// Reported values are rounded down to a multiple of this.
    resolution_ns: u64,
}

impl ReferenceModel {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn ns_at(&self, cycle: u64) -> u64 {
        let elapsed = cycle.wrapping_sub(self.anchor_cycle) as f64 * self.ns_per_cycle;
        let ns = self.anchor_ns.wrapping_add(elapsed as u64);
        ns - ns % self.resolution_ns
    }
}

#[derive(Debug)]
struct Timeline {
    cycles: AtomicU64,
    step: u64,
    reference: Mutex<ReferenceModel>,
    reference_reads: AtomicU64,
    fail_all: AtomicBool,
    fail_next: AtomicU32,
}

impl Timeline {
    fn reference(&self) -> MutexGuard<'_, ReferenceModel> {
        self.reference.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared virtual timeline driving a [`SimulatedCounter`] and a
/// [`SimulatedReference`].
#[derive(Debug, Clone)]
pub struct SimulatedTimeline {
    inner: Arc<Timeline>,
}

impl SimulatedTimeline {
    /// Create a timeline.
    ///
    /// * `ns_per_cycle` - true rate of the reference clock against the counter.
    /// * `start_cycle` / `start_ns` - initial counter value and reference time.
    /// * `step` - cycles every counter or reference read advances the counter by.
    #[must_use]
    pub fn new(ns_per_cycle: f64, start_cycle: u64, start_ns: u64, step: u64) -> Self {
        Self {
            inner: Arc::new(Timeline {
                cycles: AtomicU64::new(start_cycle),
                step,
                reference: Mutex::new(ReferenceModel {
                    anchor_cycle: start_cycle,
                    anchor_ns: start_ns,
                    ns_per_cycle,
                    resolution_ns: 1,
                }),
                reference_reads: AtomicU64::new(0),
                fail_all: AtomicBool::new(false),
                fail_next: AtomicU32::new(0),
            }),
        }
    }

    /// A counter running at `hz` whose every read costs about `read_cost_ns`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn with_frequency(hz: f64, read_cost_ns: u64) -> Self {
        let ns_per_cycle = 1e9 / hz;
        let step = ((read_cost_ns as f64 / ns_per_cycle) as u64).max(1);
        Self::new(ns_per_cycle, 1_000_000, 5_000_000_000, step)
    }

    /// Report reference values rounded down to `resolution_ns`.
    #[must_use]
    pub fn with_resolution(self, resolution_ns: u64) -> Self {
        self.inner.reference().resolution_ns = resolution_ns.max(1);
        self
    }

    /// Handle reading the virtual counter.
    #[must_use]
    pub fn counter(&self) -> SimulatedCounter {
        SimulatedCounter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Handle reading the virtual reference clock.
    #[must_use]
    pub fn reference(&self) -> SimulatedReference {
        SimulatedReference {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Current counter value, without advancing it.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Acquire)
    }

    /// Current reference time, without advancing the counter.
    #[must_use]
    pub fn reference_ns(&self) -> u64 {
        let model = self.inner.reference();
        model.ns_at(self.cycles())
    }

    /// True reference rate.
    #[must_use]
    pub fn ns_per_cycle(&self) -> f64 {
        self.inner.reference().ns_per_cycle
    }

    /// Advance the counter.
    pub fn advance_cycles(&self, cycles: u64) {
        self.inner.cycles.fetch_add(cycles, Ordering::AcqRel);
    }

    /// Advance the counter by the cycles `ns` of reference time takes.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn advance_ns(&self, ns: u64) {
        let cycles = (ns as f64 / self.ns_per_cycle()) as u64;
        self.advance_cycles(cycles);
    }

    /// Change the reference rate from the current cycle on.
    pub fn set_ns_per_cycle(&self, ns_per_cycle: f64) {
        let mut model = self.inner.reference();
        let now = self.inner.cycles.load(Ordering::Acquire);
        let anchor_ns = model.ns_at(now);
        model.anchor_ns = anchor_ns;
        model.anchor_cycle = now;
        model.ns_per_cycle = ns_per_cycle;
    }

    /// Scale the reference rate by `1 + ppm / 1e6` from the current cycle on.
    pub fn shift_rate_ppm(&self, ppm: f64) {
        self.set_ns_per_cycle(self.ns_per_cycle() * (1.0 + ppm * 1e-6));
    }
}

/// Virtual cycle counter; every read advances the timeline by one step.
#[derive(Debug, Clone)]
pub struct SimulatedCounter {
    inner: Arc<Timeline>,
}

impl CycleSource for SimulatedCounter {
    fn read_cycles(&self) -> u64 {
        self.inner
            .cycles
            .fetch_add(self.inner.step, Ordering::AcqRel)
    }
}

/// Virtual reference clock with failure injection.
#[derive(Debug, Clone)]
pub struct SimulatedReference {
    inner: Arc<Timeline>,
}

impl SimulatedReference {
    /// Make every subsequent read fail (or succeed again).
    pub fn fail_all_reads(&self, fail: bool) {
        self.inner.fail_all.store(fail, Ordering::Release);
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.inner.fail_next.store(count, Ordering::Release);
    }

    /// Reads attempted so far, failed ones included.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.inner.reference_reads.load(Ordering::Acquire)
    }

    fn should_fail(&self) -> bool {
        if self.inner.fail_all.load(Ordering::Acquire) {
            return true;
        }
        self.inner
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ReferenceClock for SimulatedReference {
    fn read_ns(&self) -> Result<u64, PlatformClockError> {
        self.inner.reference_reads.fetch_add(1, Ordering::AcqRel);
        let result = if self.should_fail() {
            Err(PlatformClockError::TimeReadFailed(
                "simulated read failure".into(),
            ))
        } else {
            let model = self.inner.reference();
            Ok(model.ns_at(self.inner.cycles.load(Ordering::Acquire)))
        };
        self.inner
            .cycles
            .fetch_add(self.inner.step, Ordering::AcqRel);
        result
    }
}
