//! Effector abstraction: the environment operations are dispatched to.

use thiserror::Error;

use crate::core::keys::KeyInput;
use crate::core::types::{ClickTarget, Mode, ScrollDirection, Snapshot};

#[derive(Debug, Error)]
pub enum EffectorError {
    #[error("{operation} is not supported in {mode} mode")]
    Unsupported {
        operation: &'static str,
        mode: Mode,
    },
    #[error("no element matches {0}")]
    ElementNotFound(String),
    #[error("input command failed: {0}")]
    Command(String),
    #[error("browser driver error: {0}")]
    Driver(String),
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One method per operation family. Failures are returned, never panicked.
///
/// Pacing between operations is the caller's job.
pub trait Effector {
    /// Press `keys` together as one chord.
    fn press(&self, keys: &[KeyInput]) -> Result<(), EffectorError>;

    /// Type text at the current focus.
    fn write(&self, text: &str) -> Result<(), EffectorError>;

    fn click(&self, target: &ClickTarget) -> Result<(), EffectorError>;

    /// Load an already-normalized URL.
    fn navigate(&self, url: &str) -> Result<(), EffectorError>;

    /// Clear the input matching `selector` and type `text` into it.
    fn type_text(&self, selector: &str, text: &str) -> Result<(), EffectorError>;

    /// One discrete scroll step.
    fn scroll_step(&self, direction: ScrollDirection) -> Result<(), EffectorError>;

    fn press_key(&self, key: &KeyInput) -> Result<(), EffectorError>;

    /// Whether [`Effector::snapshot`] produces anything.
    fn supports_snapshots(&self) -> bool {
        false
    }

    /// Capture the current state for an outcome.
    fn snapshot(&self) -> Result<Option<Snapshot>, EffectorError> {
        Ok(None)
    }
}
