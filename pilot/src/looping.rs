//! The session control loop behind `pilot run` and `pilot exec`.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::session::Session;
use crate::core::types::{ActionBatch, Snapshot};
use crate::exit_codes;
use crate::io::config::MAX_ITERATIONS;
use crate::io::effector::Effector;
use crate::io::executor::{ActionExecutor, BatchOutcome, BatchStop};
use crate::io::generator::{ActionGenerator, GenerationError};
use crate::io::model::ModelClient;
use crate::io::pause::Pause;
use crate::io::perception::Perceive;
use crate::step::{IterationReport, StepOutcome, run_step};

/// Reason why a session terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// An executed `done` operation.
    Done { summary: String },
    /// The generator returned an empty batch, either on purpose or after
    /// exhausting its attempts.
    NoActions { exhausted: bool },
    /// Unknown model or explicit rejection; no retry was made.
    ModelRejected { message: String },
    UnrecognizedOperation { kind: String },
    IterationCeiling { max_iterations: u32 },
    Error { message: String },
}

impl StopReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::Done { .. } | StopReason::NoActions { .. } => exit_codes::OK,
            StopReason::ModelRejected { .. } => exit_codes::MODEL,
            StopReason::IterationCeiling { .. } => exit_codes::CEILING,
            StopReason::UnrecognizedOperation { .. } | StopReason::Error { .. } => {
                exit_codes::INVALID
            }
        }
    }

    /// Error text for stops that are failures.
    pub fn error(&self) -> Option<String> {
        match self {
            StopReason::Done { .. } | StopReason::NoActions { .. } => None,
            StopReason::ModelRejected { message } | StopReason::Error { message } => {
                Some(message.clone())
            }
            StopReason::UnrecognizedOperation { kind } => {
                Some(format!("unrecognized operation '{kind}'"))
            }
            StopReason::IterationCeiling { max_iterations } => Some(format!(
                "iteration ceiling of {max_iterations} reached"
            )),
        }
    }
}

impl From<BatchStop> for StopReason {
    fn from(stop: BatchStop) -> Self {
        match stop {
            BatchStop::Done { summary } => StopReason::Done { summary },
            BatchStop::Unrecognized { kind } => StopReason::UnrecognizedOperation { kind },
        }
    }
}

/// The user-visible result of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub objective: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub loop_count: u32,
    pub iterations: Vec<IterationReport>,
    pub stop: StopReason,
    pub succeeded_actions: usize,
    pub total_actions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReport {
    fn finish(
        session: &Session,
        iterations: Vec<IterationReport>,
        stop: StopReason,
        final_snapshot: Option<Snapshot>,
    ) -> Self {
        let succeeded_actions = iterations
            .iter()
            .flat_map(|it| &it.outcomes)
            .filter(|o| o.succeeded)
            .count();
        let total_actions = iterations.iter().map(|it| it.outcomes.len()).sum();
        Self {
            objective: session.objective().to_string(),
            session_id: session.session_id().map(str::to_string),
            loop_count: session.loop_count(),
            iterations,
            error: stop.error(),
            stop,
            succeeded_actions,
            total_actions,
            final_snapshot,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stop.exit_code()
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        let outcome = match &self.stop {
            StopReason::Done { summary } if summary.is_empty() => "done".to_string(),
            StopReason::Done { summary } => format!("done: {summary}"),
            StopReason::NoActions { exhausted: false } => "no further actions".to_string(),
            StopReason::NoActions { exhausted: true } => {
                "no further actions (model replies unusable)".to_string()
            }
            other => other.error().unwrap_or_default(),
        };
        format!(
            "{outcome} ({}/{} actions succeeded over {} iterations)",
            self.succeeded_actions, self.total_actions, self.loop_count
        )
    }
}

/// Refuse blank objectives before any session exists.
pub fn require_objective(objective: &str) -> Result<&str> {
    let trimmed = objective.trim();
    if trimmed.is_empty() {
        bail!("objective must not be empty");
    }
    Ok(trimmed)
}

/// Drive one session from objective to termination.
///
/// Stops on `done`, an empty batch, an unrecognized operation, a model
/// rejection, any other generation error, or when `max_iterations` batches
/// have run. The ceiling never exceeds [`MAX_ITERATIONS`]. Every stop resolves
/// to a report; nothing is propagated.
#[instrument(skip_all, fields(mode = %generator.mode(), max_iterations))]
pub fn run_session<M, P, E, S, F>(
    objective: &str,
    generator: &ActionGenerator<'_, M, P, S>,
    executor: &ActionExecutor<'_, E, S>,
    max_iterations: u32,
    mut on_iteration: F,
) -> SessionReport
where
    M: ModelClient,
    P: Perceive,
    E: Effector,
    S: Pause,
    F: FnMut(&IterationReport),
{
    let instructions = match generator.instructions(objective) {
        Ok(text) => text,
        Err(err) => {
            let session = Session::new(objective, String::new());
            return SessionReport::finish(&session, Vec::new(), stop_for(err), None);
        }
    };
    let max_iterations = max_iterations.clamp(1, MAX_ITERATIONS);
    let mut session = Session::new(objective, instructions);
    let mut iterations = Vec::new();
    let mut final_snapshot = None;

    let stop = loop {
        if session.loop_count() >= max_iterations {
            warn!(loop_count = session.loop_count(), "iteration ceiling reached");
            break StopReason::IterationCeiling { max_iterations };
        }
        match run_step(&mut session, generator, executor) {
            Ok(StepOutcome::NoActions { exhausted }) => {
                break StopReason::NoActions { exhausted };
            }
            Ok(StepOutcome::Executed { report, result }) => {
                on_iteration(&report);
                iterations.push(report);
                if result.final_snapshot.is_some() {
                    final_snapshot = result.final_snapshot;
                }
                if let Some(stop) = result.stop {
                    break stop.into();
                }
            }
            Err(err) => break stop_for(err),
        }
    };

    info!(loop_count = session.loop_count(), stop = ?stop, "session terminated");
    SessionReport::finish(&session, iterations, stop, final_snapshot)
}

/// Execute a caller-supplied batch once, without the generator.
#[instrument(skip_all, fields(operations = batch.len()))]
pub fn run_supplied<E: Effector, S: Pause>(
    objective: &str,
    batch: ActionBatch,
    executor: &ActionExecutor<'_, E, S>,
) -> SessionReport {
    let mut session = Session::new(objective, String::new());
    if batch.is_empty() {
        return SessionReport::finish(
            &session,
            Vec::new(),
            StopReason::NoActions { exhausted: false },
            None,
        );
    }
    let BatchOutcome {
        outcomes,
        stop,
        final_snapshot,
    } = executor.execute_batch(&batch);
    session.record_iteration(&batch, &outcomes);
    let report = IterationReport {
        iteration: 1,
        attempts: 0,
        batch,
        outcomes,
        stop: stop.clone(),
    };
    let stop = stop.map_or(StopReason::NoActions { exhausted: false }, StopReason::from);
    SessionReport::finish(&session, vec![report], stop, final_snapshot)
}

fn stop_for(err: GenerationError) -> StopReason {
    match err {
        GenerationError::UnknownModel(_) | GenerationError::Rejected(_) => {
            StopReason::ModelRejected {
                message: err.to_string(),
            }
        }
        GenerationError::Prompt(_) => StopReason::Error {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Mode;
    use crate::io::config::PilotConfig;
    use crate::io::generator::GeneratorSettings;
    use crate::test_support::{
        FakePerception, RecordingEffector, RecordingPause, ScriptedModel, batch,
    };
    use serde_json::json;

    fn run(model: &ScriptedModel, effector: &RecordingEffector, max: u32) -> SessionReport {
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let settings = GeneratorSettings::from_config(&PilotConfig::default(), Mode::Desktop);
        let generator = ActionGenerator::new(model, &perception, &pause, settings).expect("gen");
        let executor = ActionExecutor::new(effector, &pause, 3);
        run_session("click around", &generator, &executor, max, |_| {})
    }

    #[test]
    fn ceiling_stops_endless_batches() {
        let replies: Vec<&str> = vec![r#"[{"kind":"wait","seconds":0}]"#; 20];
        let model = ScriptedModel::replies(&replies);
        let report = run(&model, &RecordingEffector::new(), 10);

        assert_eq!(
            report.stop,
            StopReason::IterationCeiling { max_iterations: 10 }
        );
        assert_eq!(report.loop_count, 10);
        assert_eq!(model.calls(), 10);
        assert_eq!(report.exit_code(), exit_codes::CEILING);
    }

    #[test]
    fn requested_ceiling_is_capped_at_ten() {
        let replies: Vec<&str> = vec![r#"[{"kind":"wait","seconds":0}]"#; 60];
        let model = ScriptedModel::replies(&replies);
        let report = run(&model, &RecordingEffector::new(), 50);

        assert_eq!(
            report.stop,
            StopReason::IterationCeiling { max_iterations: 10 }
        );
        assert_eq!(report.loop_count, 10);
        assert_eq!(model.calls(), 10);
    }

    #[test]
    fn done_terminates_with_summary() {
        let model = ScriptedModel::replies(&[
            r#"[{"kind":"click","x":5,"y":5}]"#,
            r#"[{"kind":"done","summary":"all set"},{"kind":"click","x":1,"y":1}]"#,
        ]);
        let effector = RecordingEffector::new();
        let report = run(&model, &effector, 10);

        assert_eq!(
            report.stop,
            StopReason::Done {
                summary: "all set".to_string()
            }
        );
        assert_eq!(report.loop_count, 2);
        assert_eq!(report.total_actions, 2);
        assert_eq!(report.succeeded_actions, 2);
        assert_eq!(effector.calls().len(), 1);
        assert_eq!(report.session_id.as_deref(), Some("scripted-2"));
        assert_eq!(report.error, None);
    }

    #[test]
    fn rejection_stops_with_model_exit_code() {
        let model = ScriptedModel::new(vec![Err(crate::io::model::ModelError::Rejected {
            status: 403,
            message: "permission denied".to_string(),
        })]);
        let report = run(&model, &RecordingEffector::new(), 10);

        assert!(matches!(report.stop, StopReason::ModelRejected { .. }));
        assert_eq!(report.exit_code(), exit_codes::MODEL);
        assert!(report.error.is_some());
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn supplied_batch_runs_once() {
        let effector = RecordingEffector::new();
        let pause = RecordingPause::new();
        let executor = ActionExecutor::new(&effector, &pause, 3);
        let report = run_supplied(
            "type hello",
            batch(json!([
                {"kind": "write", "content": "hello"},
                {"kind": "fly"}
            ])),
            &executor,
        );

        assert_eq!(report.loop_count, 1);
        assert_eq!(report.total_actions, 2);
        assert_eq!(report.succeeded_actions, 1);
        assert_eq!(
            report.stop,
            StopReason::UnrecognizedOperation {
                kind: "fly".to_string()
            }
        );
        assert_eq!(report.exit_code(), exit_codes::INVALID);
    }

    #[test]
    fn blank_objective_is_refused() {
        assert!(require_objective("   ").is_err());
        assert_eq!(require_objective(" go ").expect("objective"), "go");
    }

    #[test]
    fn summary_line_reads_naturally() {
        let model = ScriptedModel::replies(&["[]"]);
        let report = run(&model, &RecordingEffector::new(), 10);
        assert_eq!(
            report.summary_line(),
            "no further actions (0/0 actions succeeded over 0 iterations)"
        );
    }
}
