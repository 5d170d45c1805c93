//! Fixed settle delays between executed operations.
//!
//! Delays let the environment settle before the next perception is captured.
//! Values are constant so runs stay comparable.

use std::time::Duration;

use crate::core::types::Operation;

/// Delay after each individual scroll step.
pub const SCROLL_STEP_DELAY: Duration = Duration::from_millis(300);

/// Delay after a page load before `navigate` returns.
pub const NAVIGATE_SETTLE: Duration = Duration::from_secs(2);

/// Delay between scrolling an element into view and clicking it.
pub const SCROLL_INTO_VIEW_DELAY: Duration = Duration::from_millis(500);

/// `wait` duration when `seconds` is absent.
pub const DEFAULT_WAIT_SECS: f64 = 1.0;

/// Longest accepted `wait`.
pub const MAX_WAIT_SECS: f64 = 600.0;

/// Largest accepted `scroll` step count.
pub const MAX_SCROLL_AMOUNT: u32 = 100;

/// `scroll` step count when `amount` is absent.
pub const DEFAULT_SCROLL_AMOUNT: u32 = 3;

/// Pacing delay after `operation` was dispatched. `done` is never paced.
pub fn pacing_after(operation: &Operation) -> Duration {
    match operation {
        Operation::Click(_) => Duration::from_secs(1),
        Operation::Press { .. }
        | Operation::Write { .. }
        | Operation::Type { .. }
        | Operation::PressKey(_) => Duration::from_millis(500),
        Operation::Navigate { .. } | Operation::Scroll { .. } | Operation::Wait { .. } => {
            Duration::from_millis(300)
        }
        Operation::Done { .. } => Duration::ZERO,
    }
}
