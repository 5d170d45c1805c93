//! Deterministic, pure logic shared by the pilot loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod extract;
pub mod keys;
pub mod locator;
pub mod pacing;
pub mod schema;
pub mod session;
pub mod types;
pub mod url;
