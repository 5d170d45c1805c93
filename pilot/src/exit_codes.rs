//! Stable exit codes for pilot CLI commands.

/// The session finished: `done`, or no further actions.
pub const OK: i32 = 0;
/// Unrecognized operation, runtime error or bad input.
pub const INVALID: i32 = 1;
/// Configuration or credentials problem; nothing was executed.
pub const CONFIG: i32 = 2;
/// The model rejected the request or the model identifier is unknown.
pub const MODEL: i32 = 3;
/// The iteration ceiling was reached.
pub const CEILING: i32 = 4;
