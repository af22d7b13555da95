//! Published calibration model with seqlock semantics.
//!
//! One writer (the calibrator) publishes a new [`CalibrationModel`] every
//! calibration interval; any number of readers convert cycle counts with
//! the latest model on every `now_ns` call. Readers never block the writer
//! and the writer never blocks readers.
//!
//! # Protocol
//!
//! ```text
//! writer:  gen := gen+1 (odd)  ─ release ─▶  fields  ─ release ─▶  gen := gen+1 (even)
//! reader:  g0 := gen (acquire) ─▶ fields ─▶ acquire fence ─▶ g1 := gen
//!          retry unless g0 == g1 and g0 is even
//! ```
//!
//! The model fields live in atomics (the rate as `f64` bits), so a torn
//! read is detected and retried rather than being a data race.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Linear cycle-to-nanosecond conversion anchored at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationModel {
    /// Cycle count at the anchor instant.
    pub base_cycle: u64,
    /// Nanoseconds at the anchor instant, as computed by the model.
    pub base_ns: u64,
    /// Conversion rate; finite and positive once published.
    pub ns_per_cycle: f64,
}

impl CalibrationModel {
    /// Project a cycle count onto the model's nanosecond timeline.
    ///
    /// The cycle delta is a wrapping difference read as signed, so a count
    /// sampled just before the anchor lands just before `base_ns`.
    #[inline]
    #[must_use]
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation
    )]
    pub fn to_ns(&self, cycle: u64) -> u64 {
        let delta = cycle.wrapping_sub(self.base_cycle) as i64;
        let offset = (delta as f64 * self.ns_per_cycle) as i64;
        self.base_ns.wrapping_add_signed(offset)
    }

    /// Cycles per nanosecond.
    #[inline]
    #[must_use]
    pub fn frequency(&self) -> f64 {
        1.0 / self.ns_per_cycle
    }

    /// Whether the rate is finite and positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ns_per_cycle.is_finite() && self.ns_per_cycle > 0.0
    }
}

/// Model fields and generation, kept on one cache line so a read touches
/// a single line.
#[derive(Debug, Default)]
struct Slots {
    /// Sequence number (odd = write in progress).
    generation: AtomicU64,
    base_cycle: AtomicU64,
    base_ns: AtomicU64,
    /// `f64::to_bits` of the rate.
    ns_per_cycle: AtomicU64,
}

/// Seqlock-protected calibration model.
///
/// Single writer, many readers. The single-writer contract is not checked
/// here; [`crate::Calibrator`] holds the only publishing path and needs
/// `&mut self` to use it.
#[derive(Debug, Default)]
pub struct CalibrationState {
    slots: CachePadded<Slots>,
}

impl CalibrationState {
    /// Create an unpublished state (generation 0, zero model).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new model.
    ///
    /// Must not be called concurrently with itself.
    pub fn publish(&self, model: CalibrationModel) {
        let slots = &*self.slots;
        let generation = slots.generation.load(Ordering::Relaxed);

        // Odd: write in progress
        slots
            .generation
            .store(generation.wrapping_add(1), Ordering::Release);
        fence(Ordering::Release);

        slots.base_cycle.store(model.base_cycle, Ordering::Relaxed);
        slots.base_ns.store(model.base_ns, Ordering::Relaxed);
        slots
            .ns_per_cycle
            .store(model.ns_per_cycle.to_bits(), Ordering::Relaxed);

        // Even: stable
        slots
            .generation
            .store(generation.wrapping_add(2), Ordering::Release);
    }

    /// Read a consistent snapshot of the model.
    ///
    /// Spins while a publish is in flight. Publishes are short and rare,
    /// so this terminates quickly in practice.
    #[inline]
    #[must_use]
    pub fn read(&self) -> CalibrationModel {
        let slots = &*self.slots;
        loop {
            let g0 = slots.generation.load(Ordering::Acquire);
            if g0 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            let model = CalibrationModel {
                base_cycle: slots.base_cycle.load(Ordering::Relaxed),
                base_ns: slots.base_ns.load(Ordering::Relaxed),
                ns_per_cycle: f64::from_bits(slots.ns_per_cycle.load(Ordering::Relaxed)),
            };

            fence(Ordering::Acquire);
            let g1 = slots.generation.load(Ordering::Acquire);
            if g0 == g1 {
                return model;
            }

            std::hint::spin_loop();
        }
    }

    /// Current generation (even when stable).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slots.generation.load(Ordering::Acquire)
    }

    /// Whether a model has been published at least once.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.generation() >= 2
    }
}
