//! Shared test utilities for docsweep integration tests.
//!
//! - `TestHarness`: a temp directory with an input share and a job database file
//! - `ScriptedProcessor` and `RunConfigBuilder` for driving runs without backends

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
