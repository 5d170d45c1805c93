//! Orchestration for a single Generating → Executing iteration.

use serde::Serialize;
use tracing::{info, instrument};

use crate::core::session::Session;
use crate::core::types::{ActionBatch, ActionOutcome};
use crate::io::effector::Effector;
use crate::io::executor::{ActionExecutor, BatchOutcome, BatchStop};
use crate::io::generator::{ActionGenerator, GenerationError};
use crate::io::model::ModelClient;
use crate::io::pause::Pause;
use crate::io::perception::Perceive;

/// Report for one executed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Generator attempts used for this batch.
    pub attempts: u32,
    pub batch: ActionBatch,
    pub outcomes: Vec<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<BatchStop>,
}

/// What one step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The generator returned no actions.
    NoActions { exhausted: bool },
    Executed {
        report: IterationReport,
        result: BatchOutcome,
    },
}

/// Generate one batch for `session` and execute it.
///
/// An executed batch is recorded in the session history and counted,
/// whether or not it ended the session.
#[instrument(skip_all, fields(loop_count = session.loop_count()))]
pub fn run_step<M, P, E, S>(
    session: &mut Session,
    generator: &ActionGenerator<'_, M, P, S>,
    executor: &ActionExecutor<'_, E, S>,
) -> Result<StepOutcome, GenerationError>
where
    M: ModelClient,
    P: Perceive,
    E: Effector,
    S: Pause,
{
    let generation = generator.generate(session)?;
    session.observe_session_id(generation.session_id.clone());
    if generation.batch.is_empty() {
        info!(
            attempts = generation.attempts,
            exhausted = generation.exhausted,
            "no further actions"
        );
        return Ok(StepOutcome::NoActions {
            exhausted: generation.exhausted,
        });
    }

    let result = executor.execute_batch(&generation.batch);
    session.record_iteration(&generation.batch, &result.outcomes);
    info!(
        loop_count = session.loop_count(),
        succeeded = result.succeeded(),
        total = result.outcomes.len(),
        "batch executed"
    );
    let report = IterationReport {
        iteration: session.loop_count(),
        attempts: generation.attempts,
        batch: generation.batch,
        outcomes: result.outcomes.clone(),
        stop: result.stop.clone(),
    };
    Ok(StepOutcome::Executed { report, result })
}
