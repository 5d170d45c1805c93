//! Session state owned by the control loop.

use serde::{Deserialize, Serialize};

use crate::core::types::{ActionOutcome, RawOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// State of one objective-driven session.
///
/// History is append-only. `loop_count` counts executed batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    objective: String,
    history: Vec<Message>,
    loop_count: u32,
    session_id: Option<String>,
}

impl Session {
    /// Start a session. `instructions` seeds the history as the system message.
    pub fn new(objective: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            history: vec![Message {
                role: Role::System,
                content: instructions.into(),
            }],
            loop_count: 0,
            session_id: None,
        }
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The last `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Keep the latest correlation token; an absent token leaves the old one.
    pub fn observe_session_id(&mut self, session_id: Option<String>) {
        if session_id.is_some() {
            self.session_id = session_id;
        }
    }

    /// Record an executed batch and count the iteration.
    pub fn record_iteration(&mut self, batch: &[RawOperation], outcomes: &[ActionOutcome]) {
        let batch_json = serde_json::Value::Array(
            batch
                .iter()
                .cloned()
                .map(serde_json::Value::Object)
                .collect(),
        )
        .to_string();
        self.history.push(Message {
            role: Role::Assistant,
            content: batch_json,
        });
        self.history.push(Message {
            role: Role::User,
            content: summarize_outcomes(outcomes),
        });
        self.loop_count += 1;
    }
}

/// One line per step: `step kind: ok` or `step kind: failed (error)`.
pub fn summarize_outcomes(outcomes: &[ActionOutcome]) -> String {
    if outcomes.is_empty() {
        return "no actions executed".to_string();
    }
    outcomes
        .iter()
        .map(|outcome| match (&outcome.error, outcome.succeeded) {
            (_, true) => format!("{} {}: ok", outcome.step, outcome.kind),
            (Some(err), false) => format!("{} {}: failed ({err})", outcome.step, outcome.kind),
            (None, false) => format!("{} {}: failed", outcome.step, outcome.kind),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
