//! Perception-action control loop for desktop and browser automation.
//!
//! A session repeatedly captures the environment, asks a generative model for
//! a batch of atomic operations toward an objective, executes them in order
//! and decides when to stop. The crate keeps a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (operation schema, reply
//!   sanitation, key and locator mapping, session state). No I/O.
//! - **[`io`]**: side effects (configuration, model client, perception,
//!   effectors, child processes). Behind traits so tests can script them.
//!
//! Orchestration modules ([`step`], [`looping`], [`status`]) combine the two
//! to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod status;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
