//! Perception sources: what the model sees before each generator attempt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error("read screenshot {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("browser state unavailable: {0}")]
    Browser(String),
}

/// Page metadata captured in browser mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    /// Length of the page source in bytes.
    pub source_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Perception {
    /// PNG screen capture, also written to `path`.
    Screen { png: Vec<u8>, path: PathBuf },
    Page(PageInfo),
}

impl Perception {
    /// Short description for the prompt's current-state section.
    pub fn state_summary(&self) -> Option<String> {
        match self {
            Perception::Screen { .. } => None,
            Perception::Page(info) => Some(format!(
                "Current URL: {}\nPage title: {}",
                info.url, info.title
            )),
        }
    }
}

/// Produces the current environment state on demand.
pub trait Perceive {
    fn capture(&self) -> Result<Perception, PerceptionError>;
}
