//! End-to-End Test Framework for Warden
//!
//! Drives the supervision core the way an embedding application would:
//! twined exchanges, sandboxed processes, teardown and restart.

pub mod fixtures;
pub mod framework;
pub mod scenarios;

pub use fixtures::*;
pub use framework::{TestConfig, TestFramework, TestMetrics, TestResult, TestScenario};
pub use scenarios::*;
