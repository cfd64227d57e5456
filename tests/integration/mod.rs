//! Integration test suite for hive.
//!
//! These tests exercise full sessions from request to terminal graph,
//! wiring the real scheduler, registry, store, and channel together. Only
//! the edges are stubbed: the completion service returns canned plans and
//! the worker executor is scripted, so no external binaries run and the
//! suite is safe in CI.
//!
//! # Test Categories
//!
//! - `strategies`: sequential, parallel, and swarm execution semantics
//! - `recovery`: timeouts, cancellation, and durable-store behavior

mod fixtures;

mod recovery;
mod strategies;
