//! Hardware cycle counter access.
//!
//! The counter is an opaque, monotonically increasing `u64` read with a
//! single instruction:
//!
//! - x86 / x86_64: `rdtsc`
//! - aarch64: `cntvct_el0` (virtual counter)
//! - anything else: nanoseconds since a process-wide anchor, so the
//!   clock still works (at one "cycle" per nanosecond) where no counter
//!   instruction is wired up
//!
//! The counter domain is assumed coherent across cores.

#![allow(unsafe_code)] // Counter instructions

/// A source of raw cycle counts.
///
/// Implementations must be cheap (no system call) and monotonic within a
/// single coherent counter domain.
pub trait CycleSource: Send + Sync {
    /// Read the current cycle count.
    fn read_cycles(&self) -> u64;
}

impl<T: CycleSource + ?Sized> CycleSource for std::sync::Arc<T> {
    #[inline]
    fn read_cycles(&self) -> u64 {
        (**self).read_cycles()
    }
}

/// The target's hardware cycle counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareCounter;

impl HardwareCounter {
    /// Name of the instruction backing this counter on the current target.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const SOURCE: &'static str = "rdtsc";
    /// Name of the instruction backing this counter on the current target.
    #[cfg(target_arch = "aarch64")]
    pub const SOURCE: &'static str = "cntvct_el0";
    /// Name of the instruction backing this counter on the current target.
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    pub const SOURCE: &'static str = "instant";

    /// Create a handle to the hardware counter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CycleSource for HardwareCounter {
    #[inline(always)]
    fn read_cycles(&self) -> u64 {
        read_hardware_cycles()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn read_hardware_cycles() -> u64 {
    // SAFETY: rdtsc is available on every x86_64 CPU and has no side effects.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(target_arch = "x86")]
#[inline(always)]
fn read_hardware_cycles() -> u64 {
    // SAFETY: rdtsc is available on every CPU this target runs on.
    unsafe { core::arch::x86::_rdtsc() }
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn read_hardware_cycles() -> u64 {
    let ticks: u64;
    // SAFETY: cntvct_el0 is readable from EL0 on all aarch64 platforms we target.
    unsafe {
        core::arch::asm!(
            "mrs {}, cntvct_el0",
            out(reg) ticks,
            options(nomem, nostack, preserves_flags),
        );
    }
    ticks
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
fn read_hardware_cycles() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
