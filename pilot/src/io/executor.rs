//! Action executor: validates and dispatches operations strictly in batch order.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::keys::KeyInput;
use crate::core::pacing::{NAVIGATE_SETTLE, SCROLL_STEP_DELAY, pacing_after};
use crate::core::schema::{kind_label, validate};
use crate::core::types::{ActionOutcome, Operation, RawOperation, Snapshot};
use crate::core::url::normalize_url;
use crate::io::effector::{Effector, EffectorError};
use crate::io::pause::Pause;

/// Why a batch stopped before its end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum BatchStop {
    Done { summary: String },
    Unrecognized { kind: String },
}

/// Outcome of one operation plus whether it ends the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub outcome: ActionOutcome,
    pub stop: Option<BatchStop>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// One entry per processed operation, in batch order.
    pub outcomes: Vec<ActionOutcome>,
    pub stop: Option<BatchStop>,
    pub final_snapshot: Option<Snapshot>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }
}

pub struct ActionExecutor<'a, E: Effector, S: Pause> {
    effector: &'a E,
    pause: &'a S,
    snapshot_every: usize,
}

impl<'a, E: Effector, S: Pause> ActionExecutor<'a, E, S> {
    pub fn new(effector: &'a E, pause: &'a S, snapshot_every: usize) -> Self {
        Self {
            effector,
            pause,
            snapshot_every: snapshot_every.max(1),
        }
    }

    /// Execute `batch` in order until it ends or an operation stops it.
    #[instrument(skip_all, fields(operations = batch.len()))]
    pub fn execute_batch(&self, batch: &[RawOperation]) -> BatchOutcome {
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut stop = None;
        for (index, raw) in batch.iter().enumerate() {
            let Dispatch {
                mut outcome,
                stop: step_stop,
            } = self.execute(index + 1, raw);
            if step_stop.is_none()
                && index % self.snapshot_every == 0
                && self.effector.supports_snapshots()
            {
                outcome.snapshot = self.take_snapshot();
            }
            outcomes.push(outcome);
            if step_stop.is_some() {
                stop = step_stop;
                break;
            }
        }
        let final_snapshot = if self.effector.supports_snapshots() {
            self.take_snapshot()
        } else {
            None
        };
        BatchOutcome {
            outcomes,
            stop,
            final_snapshot,
        }
    }

    /// Validate and dispatch a single operation. `step` is 1-based.
    #[instrument(skip_all, fields(step))]
    pub fn execute(&self, step: usize, raw: &RawOperation) -> Dispatch {
        let kind = kind_label(raw);
        if let Some(thought) = raw.get("thought").and_then(|v| v.as_str()) {
            info!(step, kind = %kind, thought, "operation thought");
        }
        let outcome = |succeeded: bool, error: Option<String>| ActionOutcome {
            step,
            kind: kind.clone(),
            operation: raw.clone(),
            succeeded,
            error,
            snapshot: None,
        };

        let operation = match validate(raw) {
            Ok(operation) => operation,
            Err(err) if err.is_terminal() => {
                warn!(step, kind = %kind, err = %err, "unrecognized operation, stopping batch");
                return Dispatch {
                    outcome: outcome(false, Some(err.to_string())),
                    stop: Some(BatchStop::Unrecognized { kind: kind.clone() }),
                };
            }
            Err(err) => {
                warn!(step, kind = %kind, err = %err, "inexecutable operation");
                return Dispatch {
                    outcome: outcome(false, Some(err.to_string())),
                    stop: None,
                };
            }
        };

        if let Operation::Done { summary } = &operation {
            info!(step, summary = %summary, "objective reported done");
            return Dispatch {
                outcome: outcome(true, None),
                stop: Some(BatchStop::Done {
                    summary: summary.clone(),
                }),
            };
        }

        let result = self.dispatch(&operation);
        self.pause.pause(pacing_after(&operation));
        match result {
            Ok(()) => {
                debug!(step, kind = %kind, "operation succeeded");
                Dispatch {
                    outcome: outcome(true, None),
                    stop: None,
                }
            }
            Err(err) => {
                warn!(step, kind = %kind, err = %err, "operation failed");
                Dispatch {
                    outcome: outcome(false, Some(err.to_string())),
                    stop: None,
                }
            }
        }
    }

    fn dispatch(&self, operation: &Operation) -> Result<(), EffectorError> {
        match operation {
            Operation::Press { keys } => {
                let chord: Vec<KeyInput> = keys.iter().map(|k| KeyInput::for_chord(k)).collect();
                self.effector.press(&chord)
            }
            Operation::Write { content } => self.effector.write(content),
            Operation::Click(target) => self.effector.click(target),
            Operation::Navigate { url } => {
                let normalized = normalize_url(url);
                if url::Url::parse(&normalized).is_err() {
                    return Err(EffectorError::InvalidUrl(normalized));
                }
                self.effector.navigate(&normalized)?;
                self.pause.pause(NAVIGATE_SETTLE);
                Ok(())
            }
            Operation::Type { selector, text } => self.effector.type_text(selector, text),
            Operation::Scroll { direction, amount } => {
                for _ in 0..*amount {
                    self.effector.scroll_step(*direction)?;
                    self.pause.pause(SCROLL_STEP_DELAY);
                }
                Ok(())
            }
            Operation::PressKey(key) => self.effector.press_key(key),
            Operation::Wait { seconds } => {
                self.pause.pause(Duration::from_secs_f64(*seconds));
                Ok(())
            }
            Operation::Done { .. } => Ok(()),
        }
    }

    fn take_snapshot(&self) -> Option<Snapshot> {
        match self.effector.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(err = %err, "snapshot failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::NamedKey;
    use crate::core::types::{ActionBatch, ClickTarget, ScrollDirection};
    use crate::test_support::{EffectorCall, RecordingEffector, RecordingPause, batch};
    use serde_json::json;

    fn run(effector: &RecordingEffector, pause: &RecordingPause, ops: ActionBatch) -> BatchOutcome {
        ActionExecutor::new(effector, pause, 3).execute_batch(&ops)
    }

    #[test]
    fn navigate_normalizes_and_settles() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        let outcome = run(
            &effector,
            &pause,
            batch(json!([{"kind": "navigate", "url": "example.com"}])),
        );

        assert_eq!(outcome.outcomes.len(), 1);
        assert!(outcome.outcomes[0].succeeded);
        assert_eq!(
            effector.calls(),
            vec![EffectorCall::Navigate("https://example.com".to_string())]
        );
        assert_eq!(
            pause.pauses(),
            vec![Duration::from_secs(2), Duration::from_millis(300)]
        );
    }

    #[test]
    fn unknown_kind_stops_batch_after_recording_it() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        let outcome = run(
            &effector,
            &pause,
            batch(json!([
                {"kind": "click", "x": 100, "y": 200},
                {"kind": "unknown_op"},
                {"kind": "write", "content": "never"}
            ])),
        );

        assert_eq!(outcome.outcomes.len(), 2);
        assert!(outcome.outcomes[0].succeeded);
        assert!(!outcome.outcomes[1].succeeded);
        assert_eq!(outcome.outcomes[1].kind, "unknown_op");
        assert_eq!(
            outcome.stop,
            Some(BatchStop::Unrecognized {
                kind: "unknown_op".to_string()
            })
        );
        assert_eq!(
            effector.calls(),
            vec![EffectorCall::Click(ClickTarget::Point { x: 100.0, y: 200.0 })]
        );
    }

    #[test]
    fn done_halts_without_effector_call_or_pacing() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        let outcome = run(
            &effector,
            &pause,
            batch(json!([
                {"kind": "done", "summary": "finished"},
                {"kind": "write", "content": "never"}
            ])),
        );

        assert_eq!(outcome.outcomes.len(), 1);
        assert!(outcome.outcomes[0].succeeded);
        assert_eq!(
            outcome.stop,
            Some(BatchStop::Done {
                summary: "finished".to_string()
            })
        );
        assert!(effector.calls().is_empty());
        assert!(pause.pauses().is_empty());
    }

    #[test]
    fn inexecutable_and_failed_steps_do_not_abort() {
        let effector = RecordingEffector::new();
        effector.fail_on("write");
        let pause = RecordingPause::new();
        let outcome = run(
            &effector,
            &pause,
            batch(json!([
                {"kind": "click"},
                {"kind": "write", "content": "boom"},
                {"kind": "press_key", "key": "enter"}
            ])),
        );

        let steps: Vec<(usize, bool)> = outcome
            .outcomes
            .iter()
            .map(|o| (o.step, o.succeeded))
            .collect();
        assert_eq!(steps, vec![(1, false), (2, false), (3, true)]);
        assert!(outcome.outcomes[0].error.is_some());
        assert_eq!(outcome.stop, None);
        assert_eq!(
            effector.calls(),
            vec![
                EffectorCall::Write("boom".to_string()),
                EffectorCall::PressKey(KeyInput::Named(NamedKey::Enter)),
            ]
        );
        // Inexecutable click is not paced.
        assert_eq!(
            pause.pauses(),
            vec![Duration::from_millis(500), Duration::from_millis(500)]
        );
    }

    #[test]
    fn scroll_issues_paced_steps() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        run(
            &effector,
            &pause,
            batch(json!([{"kind": "scroll", "direction": "up", "amount": 2}])),
        );

        assert_eq!(
            effector.calls(),
            vec![
                EffectorCall::Scroll(ScrollDirection::Up),
                EffectorCall::Scroll(ScrollDirection::Up),
            ]
        );
        assert_eq!(pause.total(), Duration::from_millis(900));
    }

    #[test]
    fn wait_defaults_to_one_second() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        run(&effector, &pause, batch(json!([{"kind": "WAIT"}])));
        assert!(effector.calls().is_empty());
        assert_eq!(
            pause.pauses(),
            vec![Duration::from_secs(1), Duration::from_millis(300)]
        );
    }

    #[test]
    fn snapshots_every_third_step_and_after_batch() {
        let effector = RecordingEffector::with_snapshots();
        let pause = RecordingPause::new();
        let outcome = run(
            &effector,
            &pause,
            batch(json!([
                {"kind": "wait", "seconds": 0},
                {"kind": "wait", "seconds": 0},
                {"kind": "wait", "seconds": 0},
                {"kind": "wait", "seconds": 0},
                {"kind": "wait", "seconds": 0}
            ])),
        );

        let with_snapshot: Vec<usize> = outcome
            .outcomes
            .iter()
            .filter(|o| o.snapshot.is_some())
            .map(|o| o.step)
            .collect();
        assert_eq!(with_snapshot, vec![1, 4]);
        assert!(outcome.final_snapshot.is_some());
    }

    #[test]
    fn chord_keys_use_named_table() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        run(
            &effector,
            &pause,
            batch(json!([{"operation": "press", "keys": ["ctrl", "l"]}])),
        );
        assert_eq!(
            effector.calls(),
            vec![EffectorCall::Press(vec![
                KeyInput::Named(NamedKey::Control),
                KeyInput::Literal("l".to_string()),
            ])]
        );
    }
}
