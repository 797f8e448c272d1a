//! Shared test utilities for casepipe integration tests.
//!
//! `TestHarness` owns a temporary pipeline database file plus an in-memory
//! mirror, and builds queues and schedulers against them.

pub mod harness;

pub use harness::{TestHarness, JUDGMENT};
