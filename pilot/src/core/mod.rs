//! Deterministic, pure logic shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod context_tracker;
pub mod plan;
pub mod spec;
pub mod states;
pub mod text;
pub mod types;
