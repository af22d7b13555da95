//! Platform monotonic reference clocks.
//!
//! The reference clock is trusted but expensive (typically a system call).
//! It is only consulted while sampling, never on the `now_ns` hot path.
//!
//! Backends:
//! - POSIX: `clock_gettime(CLOCK_MONOTONIC)`
//! - macOS: `mach_continuous_time()` scaled by `mach_timebase_info`
//! - Windows: `QueryPerformanceCounter` scaled by `QueryPerformanceFrequency`

#![allow(unsafe_code)] // Platform clock FFI

use cycleclock_common::error::PlatformClockError;

/// A fallible source of monotonic nanoseconds.
pub trait ReferenceClock: Send {
    /// Read the current reference time in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns the platform failure; callers decide whether to retry.
    fn read_ns(&self) -> Result<u64, PlatformClockError>;
}

impl<T: ReferenceClock + Sync + ?Sized> ReferenceClock for std::sync::Arc<T> {
    fn read_ns(&self) -> Result<u64, PlatformClockError> {
        (**self).read_ns()
    }
}

/// The platform's monotonic clock.
///
/// Construction performs the one-time timebase query the platform needs,
/// so every per-platform setup failure surfaces from [`MonotonicClock::new`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    backend: Backend,
}

impl MonotonicClock {
    /// Set up the platform backend.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformClockError::TimebaseUnavailable`],
    /// [`PlatformClockError::DegenerateScale`] or
    /// [`PlatformClockError::FrequencyQueryFailed`] when the platform
    /// timebase cannot be established.
    pub fn new() -> Result<Self, PlatformClockError> {
        Ok(Self {
            backend: Backend::init()?,
        })
    }
}

impl ReferenceClock for MonotonicClock {
    #[inline]
    fn read_ns(&self) -> Result<u64, PlatformClockError> {
        self.backend.read_ns()
    }
}

// ---------------------------------------------------------------------------
// POSIX
// ---------------------------------------------------------------------------

#[cfg(all(unix, not(target_vendor = "apple")))]
#[derive(Debug, Clone, Copy)]
struct Backend;

#[cfg(all(unix, not(target_vendor = "apple")))]
impl Backend {
    #[allow(clippy::unnecessary_wraps)]
    fn init() -> Result<Self, PlatformClockError> {
        Ok(Self)
    }

    #[allow(clippy::cast_sign_loss)]
    fn read_ns(self) -> Result<u64, PlatformClockError> {
        use nix::time::{clock_gettime, ClockId};

        let now = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(|e| PlatformClockError::TimeReadFailed(e.to_string()))?;
        Ok((now.tv_sec() as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(now.tv_nsec() as u64))
    }
}

// ---------------------------------------------------------------------------
// macOS / iOS
// ---------------------------------------------------------------------------

#[cfg(target_vendor = "apple")]
mod mach {
    /// `mach_timebase_info_data_t`.
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub(super) struct TimebaseInfo {
        pub(super) numer: u32,
        pub(super) denom: u32,
    }

    extern "C" {
        pub(super) fn mach_timebase_info(info: *mut TimebaseInfo) -> i32;
        pub(super) fn mach_continuous_time() -> u64;
    }

    pub(super) const KERN_SUCCESS: i32 = 0;
}

#[cfg(target_vendor = "apple")]
#[derive(Debug, Clone, Copy)]
struct Backend {
    numer: u64,
    denom: u64,
}

#[cfg(target_vendor = "apple")]
impl Backend {
    fn init() -> Result<Self, PlatformClockError> {
        let mut info = mach::TimebaseInfo::default();
        // SAFETY: `info` is a valid, writable TimebaseInfo.
        let code = unsafe { mach::mach_timebase_info(&mut info) };
        if code != mach::KERN_SUCCESS {
            return Err(PlatformClockError::TimebaseUnavailable { code });
        }
        if info.denom == 0 {
            return Err(PlatformClockError::DegenerateScale);
        }
        Ok(Self {
            numer: u64::from(info.numer),
            denom: u64::from(info.denom),
        })
    }

    #[allow(clippy::unnecessary_wraps, clippy::cast_possible_truncation)]
    fn read_ns(self) -> Result<u64, PlatformClockError> {
        // SAFETY: no preconditions.
        let ticks = unsafe { mach::mach_continuous_time() };
        Ok((u128::from(ticks) * u128::from(self.numer) / u128::from(self.denom)) as u64)
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[cfg(windows)]
#[derive(Debug, Clone, Copy)]
struct Backend {
    ns_per_tick: f64,
}

#[cfg(windows)]
impl Backend {
    #[allow(clippy::cast_precision_loss)]
    fn init() -> Result<Self, PlatformClockError> {
        use windows::Win32::System::Performance::QueryPerformanceFrequency;

        let mut frequency = 0i64;
        // SAFETY: `frequency` is a valid, writable i64.
        unsafe { QueryPerformanceFrequency(&mut frequency) }
            .map_err(|e| PlatformClockError::FrequencyQueryFailed(e.to_string()))?;
        if frequency <= 0 {
            return Err(PlatformClockError::DegenerateScale);
        }
        Ok(Self {
            ns_per_tick: 1_000_000_000.0 / frequency as f64,
        })
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn read_ns(self) -> Result<u64, PlatformClockError> {
        use windows::Win32::System::Performance::QueryPerformanceCounter;

        let mut ticks = 0i64;
        // SAFETY: `ticks` is a valid, writable i64.
        unsafe { QueryPerformanceCounter(&mut ticks) }
            .map_err(|e| PlatformClockError::CounterQueryFailed(e.to_string()))?;
        Ok((ticks as f64 * self.ns_per_tick) as u64)
    }
}

#[cfg(not(any(unix, windows)))]
compile_error!("no monotonic reference clock backend for this target");
