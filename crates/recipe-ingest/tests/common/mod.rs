//! Shared test utilities for recipe-ingest integration tests.
//!
//! This module provides:
//! - Scripted fakes for every pipeline collaborator, counting their calls
//! - `TestHarness` wiring the fakes, an in-memory store and a temp media dir

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
