//! Shared deterministic types for the perception/action loop.
//!
//! These types are the contract between the generator, the validator and the
//! executor. They carry no I/O and serialize stably for reports.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::keys::KeyInput;

/// Environment a session drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Host OS input subsystem; perception is a screen capture.
    #[default]
    Desktop,
    /// Browser driver; perception is page metadata.
    Browser,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Desktop => "desktop",
            Mode::Browser => "browser",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" | "os" => Ok(Mode::Desktop),
            "browser" | "web" => Ok(Mode::Browser),
            other => Err(format!("unknown mode '{other}' (expected desktop|browser)")),
        }
    }
}

/// An operation exactly as the model (or a caller) produced it.
///
/// Never trusted: field presence and types are checked by
/// [`crate::core::schema::validate`] before anything is dispatched.
pub type RawOperation = Map<String, Value>;

/// Ordered operations from one generator call. Order is execution order.
pub type ActionBatch = Vec<RawOperation>;

/// Closed set of recognized operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Press,
    Hotkey,
    Write,
    Click,
    Navigate,
    Type,
    Scroll,
    PressKey,
    Wait,
    Done,
}

impl OperationKind {
    /// Parse a discriminator, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "press" => OperationKind::Press,
            "hotkey" => OperationKind::Hotkey,
            "write" => OperationKind::Write,
            "click" => OperationKind::Click,
            "navigate" => OperationKind::Navigate,
            "type" => OperationKind::Type,
            "scroll" => OperationKind::Scroll,
            "press_key" => OperationKind::PressKey,
            "wait" => OperationKind::Wait,
            "done" => OperationKind::Done,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Press => "press",
            OperationKind::Hotkey => "hotkey",
            OperationKind::Write => "write",
            OperationKind::Click => "click",
            OperationKind::Navigate => "navigate",
            OperationKind::Type => "type",
            OperationKind::Scroll => "scroll",
            OperationKind::PressKey => "press_key",
            OperationKind::Wait => "wait",
            OperationKind::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Where a click lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickTarget {
    /// Screen (desktop) or viewport (browser) coordinates in pixels.
    Point { x: f64, y: f64 },
    /// CSS selector (browser only).
    Selector(String),
    /// Visible element text (browser only).
    Text(String),
}

/// A validated, strongly-typed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Key chord; covers both `press` and `hotkey`.
    Press { keys: Vec<String> },
    Write { content: String },
    Click(ClickTarget),
    Navigate { url: String },
    Type { selector: String, text: String },
    Scroll { direction: ScrollDirection, amount: u32 },
    PressKey(KeyInput),
    Wait { seconds: f64 },
    Done { summary: String },
}

/// PNG state capture attached to outcomes, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub png_base64: String,
}

impl Snapshot {
    pub fn from_png(png: &[u8]) -> Self {
        Self {
            png_base64: STANDARD.encode(png),
        }
    }
}

/// Result of dispatching one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// 1-based position within the batch.
    pub step: usize,
    /// Normalized kind, or the unrecognized discriminator as given.
    pub kind: String,
    /// Echo of the raw operation.
    pub operation: RawOperation,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}
