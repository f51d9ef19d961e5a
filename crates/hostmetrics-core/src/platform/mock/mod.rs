//! Mock host implementations for testing.
//!
//! This module provides `MockFs` and pre-built scenarios for testing
//! scrapers without requiring actual Linux `/proc` filesystem access.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::SCENARIO_BOOT_TIME;
