//! Shared helpers for vdu-mount integration tests.

pub mod harness;

#[allow(unused_imports)]
pub use harness::*;
