//! Sanitation and parsing of model replies.
//!
//! Model output frequently wraps JSON in a fenced code block or surrounds it
//! with prose. [`extract_json_text`] isolates the JSON candidate and
//! [`parse_reply`] turns it into an [`ActionBatch`] without trusting any field.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::{ActionBatch, RawOperation};

const FENCE: &str = "```";

/// Language tag directly after an opening fence (e.g. `json`). Only a tag that
/// ends its line counts, so a one-line body such as "```true```" survives.
static LANG_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n").expect("valid lang tag regex")
});

/// Why a reply could not become a batch. Both kinds are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("model returned an empty reply")]
    Empty,
    #[error("reply is not a JSON action list: {0}")]
    Malformed(String),
}

/// Isolate the JSON candidate inside a model reply.
///
/// 1. Fenced block: text strictly between the first opening fence (minus an
///    optional language tag ending the fence line) and the next closing fence. Without a closing
///    fence, everything after the opening fence.
/// 2. Otherwise, from the first `[` to the last `]`.
/// 3. Otherwise, the raw text.
///
/// The result is trimmed.
pub fn extract_json_text(reply: &str) -> &str {
    if let Some(start) = reply.find(FENCE) {
        let after_fence = &reply[start + FENCE.len()..];
        let tag_len = LANG_TAG_RE
            .find(after_fence)
            .map(|m| m.end())
            .unwrap_or_default();
        let body = &after_fence[tag_len..];
        let block = match body.find(FENCE) {
            Some(end) => &body[..end],
            None => body,
        };
        return block.trim();
    }

    if let (Some(open), Some(close)) = (reply.find('['), reply.rfind(']'))
        && open < close
    {
        return reply[open..=close].trim();
    }

    reply.trim()
}

/// Sanitize and parse a reply into a batch.
///
/// A JSON array yields one operation per element; non-object elements become
/// empty operations so validation reports them in place. A single JSON object
/// is treated as a one-element batch. `[]` is a valid empty batch.
pub fn parse_reply(reply: &str) -> Result<ActionBatch, ReplyError> {
    if reply.trim().is_empty() {
        return Err(ReplyError::Empty);
    }
    let candidate = extract_json_text(reply);
    if candidate.is_empty() {
        return Err(ReplyError::Empty);
    }
    let value: Value =
        serde_json::from_str(candidate).map_err(|err| ReplyError::Malformed(err.to_string()))?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(into_operation).collect()),
        Value::Object(map) => Ok(vec![map]),
        other => Err(ReplyError::Malformed(format!(
            "expected a JSON array, got {}",
            json_type(&other)
        ))),
    }
}

fn into_operation(item: Value) -> RawOperation {
    match item {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
