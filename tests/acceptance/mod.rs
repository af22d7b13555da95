//! Integration tests for cycleclock acceptance testing.
//!
//! Bounds are loose enough for virtualized and loaded CI hosts; the soak
//! test is `#[ignore]`d and meant for dedicated machines:
//!
//! ```sh
//! cargo test --test acceptance_tests -- --ignored
//! ```

mod common;
mod hardware_clock_test;
mod service_test;
mod soak_test;
