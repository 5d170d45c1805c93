//! Sleeping behind a trait so tests can observe delays without waiting.

use std::thread;
use std::time::Duration;

pub trait Pause {
    fn pause(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
