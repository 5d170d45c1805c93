//! Screenshot judgment.
//!
//! Sends the final screenshot and the case guideline to the model and parses
//! a `{ "guideline_met": bool, "reason": string }` verdict.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use minijinja::{Environment, context};
use pilot::core::extract::extract_json_text;
use pilot::io::model::{Attachment, ModelClient, ModelError, ModelRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");

/// The model's verdict for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub guideline_met: bool,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("read screenshot {path}: {source}")]
    Screenshot {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("render judge prompt: {0}")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("unparseable verdict: {0}")]
    Verdict(String),
}

pub fn render_prompt(guideline: &str) -> Result<String, JudgeError> {
    let env = Environment::new();
    let rendered = env.render_str(JUDGE_TEMPLATE, context! { guideline => guideline.trim() })?;
    Ok(rendered)
}

/// Ask `model` whether the screenshot at `screenshot` meets `guideline`.
#[instrument(skip_all, fields(screenshot = %screenshot.display()))]
pub fn judge_screenshot<M: ModelClient>(
    model: &M,
    screenshot: &Path,
    guideline: &str,
) -> Result<Judgment, JudgeError> {
    let png = fs::read(screenshot).map_err(|source| JudgeError::Screenshot {
        path: screenshot.to_path_buf(),
        source,
    })?;
    let request = ModelRequest {
        prompt: render_prompt(guideline)?,
        attachments: vec![Attachment::Image {
            mime_type: "image/png".to_string(),
            data: STANDARD.encode(png),
        }],
    };
    let reply = model.generate(&request)?;
    let judgment = parse_judgment(&reply.text)?;
    debug!(
        guideline_met = judgment.guideline_met,
        reason = %judgment.reason,
        "screenshot judged"
    );
    Ok(judgment)
}

/// Parse a verdict, tolerating a fenced block or prose around the object.
pub fn parse_judgment(reply: &str) -> Result<Judgment, JudgeError> {
    let candidate = object_candidate(reply);
    serde_json::from_str(candidate).map_err(|err| JudgeError::Verdict(format!("{err}: {reply}")))
}

fn object_candidate(reply: &str) -> &str {
    if reply.contains("```") {
        return extract_json_text(reply);
    }
    match (reply.find('{'), reply.rfind('}')) {
        (Some(open), Some(close)) if open < close => &reply[open..=close],
        _ => reply.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot::test_support::ScriptedModel;

    #[test]
    fn parses_bare_and_fenced_verdicts() {
        let bare = parse_judgment(r#"{"guideline_met": true, "reason": "repo page shown"}"#)
            .expect("bare");
        assert!(bare.guideline_met);

        let fenced = parse_judgment(
            "Here you go:\n```json\n{\"guideline_met\": false, \"reason\": \"blank tab\"}\n```",
        )
        .expect("fenced");
        assert_eq!(
            fenced,
            Judgment {
                guideline_met: false,
                reason: "blank tab".to_string()
            }
        );

        let prose = parse_judgment(
            "Verdict: {\"guideline_met\": true, \"reason\": \"player visible\"} thanks",
        )
        .expect("prose");
        assert!(prose.guideline_met);
    }

    #[test]
    fn rejects_non_boolean_verdict() {
        let err = parse_judgment(r#"{"guideline_met": "yes", "reason": "x"}"#)
            .expect_err("string verdict");
        assert!(matches!(err, JudgeError::Verdict(_)));
    }

    #[test]
    fn prompt_names_guideline() {
        let prompt = render_prompt("  A Github page is visible. ").expect("prompt");
        assert!(prompt.contains("Guideline: A Github page is visible."));
        assert!(prompt.contains("guideline_met"));
    }

    #[test]
    fn sends_screenshot_to_model() {
        let temp = tempfile::tempdir().expect("tempdir");
        let screenshot = temp.path().join("screenshot.png");
        fs::write(&screenshot, b"png-bytes").expect("write screenshot");
        let model = ScriptedModel::replies(&[r#"{"guideline_met": true, "reason": "ok"}"#]);

        let judgment = judge_screenshot(&model, &screenshot, "A page is visible.").expect("judge");

        assert!(judgment.guideline_met);
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].attachments,
            vec![Attachment::Image {
                mime_type: "image/png".to_string(),
                data: STANDARD.encode(b"png-bytes"),
            }]
        );
    }

    #[test]
    fn missing_screenshot_is_reported() {
        let model = ScriptedModel::replies(&[]);
        let err = judge_screenshot(&model, Path::new("/nonexistent/shot.png"), "x")
            .expect_err("missing");
        assert!(matches!(err, JudgeError::Screenshot { .. }));
        assert_eq!(model.calls(), 0);
    }
}
