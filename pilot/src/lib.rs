//! Autonomous task-execution controller.
//!
//! Drives an external code-generation agent through the steps of a declarative
//! spec, verifies the result and recovers from failures, escalating to a human
//! only when retries run out. Every handler's effect is persisted, so a run can
//! be resumed after a crash.
//!
//! - **[`core`]**: Pure, deterministic logic (states and transitions, spec model,
//!   context estimation). No I/O.
//! - **[`io`]**: Side-effecting operations (sessions on disk, processes, agent,
//!   git). Behind traits where tests need doubles.
//! - **[`tools`]**: Recovery and verification tools plus their registry.
//!
//! [`engine`] coordinates all three; [`operator`] is the human in the loop.
//! [`authoring`] writes new specs with the agent's help.

pub mod authoring;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod operator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
