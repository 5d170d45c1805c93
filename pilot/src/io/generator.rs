//! Action generator: prompt, model call, reply sanitation and retries.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::extract::{ReplyError, parse_reply};
use crate::core::session::{Message, Session};
use crate::core::types::{ActionBatch, Mode};
use crate::io::config::{MAX_ATTEMPTS, PilotConfig};
use crate::io::model::{Attachment, ModelClient, ModelError, ModelRequest};
use crate::io::pause::Pause;
use crate::io::perception::{Perceive, Perception, PerceptionError};
use crate::io::prompt::{PromptEngine, PromptInput};

/// Failures that end generation without a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("unrecognized model identifier '{0}'")]
    UnknownModel(String),
    #[error("model rejected the request: {0}")]
    Rejected(String),
    #[error("render prompt: {0}")]
    Prompt(String),
}

/// Result of one generator call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub batch: ActionBatch,
    pub session_id: Option<String>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Every attempt failed; `batch` is empty.
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub mode: Mode,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub history_limit: usize,
}

impl GeneratorSettings {
    pub fn from_config(config: &PilotConfig, mode: Mode) -> Self {
        Self {
            mode,
            max_attempts: config.retry.max_attempts.clamp(1, MAX_ATTEMPTS),
            backoff: config.retry.backoff(),
            history_limit: config.history_limit,
        }
    }
}

/// Why one attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Perception(#[from] PerceptionError),
    #[error(transparent)]
    Model(ModelError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    Fatal(GenerationError),
}

pub struct ActionGenerator<'a, M: ModelClient, P: Perceive, S: Pause> {
    model: &'a M,
    perception: &'a P,
    pause: &'a S,
    prompts: PromptEngine,
    settings: GeneratorSettings,
}

impl<'a, M: ModelClient, P: Perceive, S: Pause> ActionGenerator<'a, M, P, S> {
    pub fn new(
        model: &'a M,
        perception: &'a P,
        pause: &'a S,
        settings: GeneratorSettings,
    ) -> Result<Self, GenerationError> {
        let prompts = PromptEngine::new().map_err(|err| GenerationError::Prompt(err.to_string()))?;
        Ok(Self {
            model,
            perception,
            pause,
            prompts,
            settings,
        })
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    /// Instructions for `objective` with no state or history, used to seed a session.
    pub fn instructions(&self, objective: &str) -> Result<String, GenerationError> {
        self.render(objective, None, &[])
    }

    /// Ask the model for the next batch.
    ///
    /// Transient failures are retried with a fresh perception after the
    /// backoff. Exhausting every attempt yields an empty batch, not an error.
    #[instrument(skip_all, fields(mode = %self.settings.mode, loop_count = session.loop_count()))]
    pub fn generate(&self, session: &Session) -> Result<Generation, GenerationError> {
        let max_attempts = self.settings.max_attempts.clamp(1, MAX_ATTEMPTS);
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                debug!(attempt, backoff_ms = self.settings.backoff.as_millis() as u64, "backing off");
                self.pause.pause(self.settings.backoff);
            }
            match self.attempt(session) {
                Ok((batch, session_id)) => {
                    info!(attempt, operations = batch.len(), "generated batch");
                    return Ok(Generation {
                        batch,
                        session_id,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!(attempt, err = %err, "generation failed");
                    return Err(err);
                }
                Err(err) => {
                    warn!(attempt, max_attempts, err = %err, "generation attempt failed");
                }
            }
        }
        warn!(max_attempts, "generation attempts exhausted");
        Ok(Generation {
            batch: Vec::new(),
            session_id: None,
            attempts: max_attempts,
            exhausted: true,
        })
    }

    fn attempt(&self, session: &Session) -> Result<(ActionBatch, Option<String>), AttemptError> {
        let perception = self.perception.capture()?;
        let state = perception.state_summary();
        let prompt = self
            .render(
                session.objective(),
                state.as_deref(),
                session.recent_history(self.settings.history_limit),
            )
            .map_err(AttemptError::Fatal)?;
        let request = ModelRequest {
            prompt,
            attachments: vec![attachment(&perception)],
        };
        let reply = self.model.generate(&request).map_err(classify_model_error)?;
        debug!(reply_bytes = reply.text.len(), "model replied");
        let batch = parse_reply(&reply.text)?;
        Ok((batch, reply.session_id))
    }

    fn render(
        &self,
        objective: &str,
        state: Option<&str>,
        history: &[Message],
    ) -> Result<String, GenerationError> {
        self.prompts
            .render(
                self.settings.mode,
                &PromptInput {
                    objective,
                    state,
                    history,
                },
            )
            .map_err(|err| GenerationError::Prompt(err.to_string()))
    }
}

fn classify_model_error(err: ModelError) -> AttemptError {
    if err.is_transient() {
        return AttemptError::Model(err);
    }
    match err {
        ModelError::UnknownModel(model) => AttemptError::Fatal(GenerationError::UnknownModel(model)),
        other => AttemptError::Fatal(GenerationError::Rejected(other.to_string())),
    }
}

fn attachment(perception: &Perception) -> Attachment {
    match perception {
        Perception::Screen { png, .. } => Attachment::Image {
            mime_type: "image/png".to_string(),
            data: STANDARD.encode(png),
        },
        Perception::Page(info) => Attachment::Text(
            serde_json::json!({
                "url": info.url,
                "title": info.title,
                "source_length": info.source_length,
            })
            .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePerception, RecordingPause, ScriptedModel};

    fn settings() -> GeneratorSettings {
        GeneratorSettings::from_config(&PilotConfig::default(), Mode::Desktop)
    }

    fn session() -> Session {
        Session::new("open example.com", "instructions")
    }

    #[test]
    fn three_malformed_replies_exhaust_attempts() {
        let model = ScriptedModel::replies(&["not json", "```json\n[{\"kind\": ]\n```", "{oops"]);
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        let generation = generator.generate(&session()).expect("generate");

        assert!(generation.batch.is_empty());
        assert_eq!(generation.session_id, None);
        assert!(generation.exhausted);
        assert_eq!(generation.attempts, 3);
        assert_eq!(model.calls(), 3);
        assert_eq!(perception.captures(), 3);
        assert_eq!(
            pause.pauses(),
            vec![Duration::from_secs(5), Duration::from_secs(5)]
        );
    }

    #[test]
    fn empty_array_is_not_retried() {
        let model = ScriptedModel::replies(&["```json\n[]\n```"]);
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        let generation = generator.generate(&session()).expect("generate");

        assert!(generation.batch.is_empty());
        assert!(!generation.exhausted);
        assert_eq!(model.calls(), 1);
        assert!(pause.pauses().is_empty());
    }

    #[test]
    fn transient_error_then_success() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::Timeout("deadline".to_string())),
            Ok("[{\"kind\":\"done\",\"summary\":\"ok\"}]".to_string()),
        ]);
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        let generation = generator.generate(&session()).expect("generate");

        assert_eq!(generation.batch.len(), 1);
        assert_eq!(generation.attempts, 2);
        assert_eq!(generation.session_id.as_deref(), Some("scripted-2"));
        assert_eq!(perception.captures(), 2);
    }

    #[test]
    fn unknown_model_fails_fast() {
        let model = ScriptedModel::new(vec![Err(ModelError::UnknownModel("gemini-x".to_string()))]);
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        let err = generator.generate(&session()).unwrap_err();

        assert_eq!(err, GenerationError::UnknownModel("gemini-x".to_string()));
        assert_eq!(model.calls(), 1);
        assert!(pause.pauses().is_empty());
    }

    #[test]
    fn perception_failure_is_retried() {
        let model = ScriptedModel::replies(&["[]"]);
        let perception = FakePerception::failing_first(1);
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        let generation = generator.generate(&session()).expect("generate");

        assert_eq!(generation.attempts, 2);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn screen_is_attached_as_png() {
        let model = ScriptedModel::replies(&["[]"]);
        let perception = FakePerception::screen();
        let pause = RecordingPause::new();
        let generator = ActionGenerator::new(&model, &perception, &pause, settings()).expect("gen");

        generator.generate(&session()).expect("generate");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("Objective: open example.com"));
        assert!(matches!(
            &requests[0].attachments[0],
            Attachment::Image { mime_type, .. } if mime_type == "image/png"
        ));
    }
}
