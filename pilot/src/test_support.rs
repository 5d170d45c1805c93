//! Test-only collaborators: scripted model, fake perception, recording effector and pause.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::core::keys::KeyInput;
use crate::core::types::{ActionBatch, ClickTarget, ScrollDirection, Snapshot};
use crate::io::effector::{Effector, EffectorError};
use crate::io::model::{ModelClient, ModelError, ModelReply, ModelRequest};
use crate::io::pause::Pause;
use crate::io::perception::{PageInfo, Perceive, Perception, PerceptionError};

/// Build a batch from a JSON array literal. Non-object elements become empty operations.
pub fn batch(value: Value) -> ActionBatch {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            })
            .collect(),
        other => panic!("batch expects a JSON array, got {other}"),
    }
}

/// Model that returns scripted replies in order, then `[]`.
///
/// The reply to call `n` (1-based) carries session id `scripted-n`.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<Result<String, ModelError>>>,
    requests: RefCell<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn replies(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Ok((*text).to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.borrow_mut().push(request.clone());
        let call = self.calls();
        let next = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()));
        next.map(|text| ModelReply {
            text,
            session_id: Some(format!("scripted-{call}")),
        })
    }
}

/// Perception source that counts captures and can fail the first few.
pub struct FakePerception {
    perception: Perception,
    fail_first: u32,
    captures: Cell<u32>,
}

impl FakePerception {
    pub fn screen() -> Self {
        Self {
            perception: Perception::Screen {
                png: b"\x89PNG\r\n\x1a\n".to_vec(),
                path: PathBuf::from("screenshots/screenshot.png"),
            },
            fail_first: 0,
            captures: Cell::new(0),
        }
    }

    pub fn page(url: &str, title: &str) -> Self {
        Self {
            perception: Perception::Page(PageInfo {
                url: url.to_string(),
                title: title.to_string(),
                source_length: 0,
            }),
            fail_first: 0,
            captures: Cell::new(0),
        }
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            fail_first: failures,
            ..Self::screen()
        }
    }

    pub fn captures(&self) -> u32 {
        self.captures.get()
    }
}

impl Perceive for FakePerception {
    fn capture(&self) -> Result<Perception, PerceptionError> {
        let n = self.captures.get() + 1;
        self.captures.set(n);
        if n <= self.fail_first {
            return Err(PerceptionError::Capture(format!("scripted failure {n}")));
        }
        Ok(self.perception.clone())
    }
}

/// One recorded effector call.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectorCall {
    Press(Vec<KeyInput>),
    Write(String),
    Click(ClickTarget),
    Navigate(String),
    TypeText { selector: String, text: String },
    Scroll(ScrollDirection),
    PressKey(KeyInput),
}

impl EffectorCall {
    fn family(&self) -> &'static str {
        match self {
            EffectorCall::Press(_) => "press",
            EffectorCall::Write(_) => "write",
            EffectorCall::Click(_) => "click",
            EffectorCall::Navigate(_) => "navigate",
            EffectorCall::TypeText { .. } => "type",
            EffectorCall::Scroll(_) => "scroll",
            EffectorCall::PressKey(_) => "press_key",
        }
    }
}

/// Effector that records calls and fails the families it is told to.
#[derive(Default)]
pub struct RecordingEffector {
    calls: RefCell<Vec<EffectorCall>>,
    failing: RefCell<Vec<&'static str>>,
    snapshots: bool,
}

impl RecordingEffector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A browser-like effector that produces snapshots.
    pub fn with_snapshots() -> Self {
        Self {
            snapshots: true,
            ..Self::default()
        }
    }

    /// Make every call of `family` (e.g. `"write"`) fail after recording it.
    pub fn fail_on(&self, family: &'static str) {
        self.failing.borrow_mut().push(family);
    }

    pub fn calls(&self) -> Vec<EffectorCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: EffectorCall) -> Result<(), EffectorError> {
        let family = call.family();
        self.calls.borrow_mut().push(call);
        if self.failing.borrow().contains(&family) {
            return Err(EffectorError::Command(format!("scripted {family} failure")));
        }
        Ok(())
    }
}

impl Effector for RecordingEffector {
    fn press(&self, keys: &[KeyInput]) -> Result<(), EffectorError> {
        self.record(EffectorCall::Press(keys.to_vec()))
    }

    fn write(&self, text: &str) -> Result<(), EffectorError> {
        self.record(EffectorCall::Write(text.to_string()))
    }

    fn click(&self, target: &ClickTarget) -> Result<(), EffectorError> {
        self.record(EffectorCall::Click(target.clone()))
    }

    fn navigate(&self, url: &str) -> Result<(), EffectorError> {
        self.record(EffectorCall::Navigate(url.to_string()))
    }

    fn type_text(&self, selector: &str, text: &str) -> Result<(), EffectorError> {
        self.record(EffectorCall::TypeText {
            selector: selector.to_string(),
            text: text.to_string(),
        })
    }

    fn scroll_step(&self, direction: ScrollDirection) -> Result<(), EffectorError> {
        self.record(EffectorCall::Scroll(direction))
    }

    fn press_key(&self, key: &KeyInput) -> Result<(), EffectorError> {
        self.record(EffectorCall::PressKey(key.clone()))
    }

    fn supports_snapshots(&self) -> bool {
        self.snapshots
    }

    fn snapshot(&self) -> Result<Option<Snapshot>, EffectorError> {
        Ok(self.snapshots.then(|| Snapshot::from_png(b"snapshot")))
    }
}

/// Pause that records requested durations without sleeping.
#[derive(Default)]
pub struct RecordingPause {
    pauses: RefCell<Vec<Duration>>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.pauses.borrow().iter().sum()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.pauses.borrow_mut().push(duration);
    }
}
