//! Calibrated cycle-counter clock.
//!
//! This crate provides:
//! - [`CycleSource`] and [`HardwareCounter`] for cheap raw cycle reads
//! - [`ReferenceClock`] and [`MonotonicClock`] for the trusted platform clock
//! - [`SyncSampler`] pairing a cycle count with a reference reading
//! - [`CalibrationState`], the seqlock-published conversion model
//! - [`Calibrator`] seeding and drift-correcting that model
//! - [`Clock`] / [`ClockReader`], the facade other code touches
//! - [`CalibrationService`] running recalibration on its own thread
//!
//! ```no_run
//! use cycleclock_common::ClockConfig;
//! use cycleclock_core::Clock;
//!
//! let mut clock = Clock::hardware(&ClockConfig::default())?;
//! let start = clock.now_ns();
//! clock.calibrate()?;
//! let elapsed = clock.now_ns() - start;
//! # let _ = elapsed;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calibrator;
pub mod clock;
pub mod counter;
pub mod reference;
pub mod sampler;
pub mod service;
#[cfg(any(test, feature = "simulated"))]
pub mod simulated;
pub mod state;

pub use calibrator::*;
pub use clock::*;
pub use counter::*;
pub use reference::*;
pub use sampler::*;
pub use service::*;
pub use state::*;
