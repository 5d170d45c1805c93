//! Generative model client abstraction.
//!
//! The [`ModelClient`] trait decouples the action generator from the actual
//! model backend (currently the Gemini `generateContent` API). Tests use
//! scripted clients that return predetermined replies without network access.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::{Credentials, ModelConfig};

/// Model-call failures, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model request timed out: {0}")]
    Timeout(String),
    #[error("model connection failed: {0}")]
    Connection(String),
    /// Rate limited or server-side failure.
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unrecognized model identifier '{0}'")]
    UnknownModel(String),
    #[error("unreadable model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout(_)
                | ModelError::Connection(_)
                | ModelError::Status { .. }
                | ModelError::InvalidResponse(_)
        )
    }
}

/// Non-text model input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Base64 image bytes.
    Image { mime_type: String, data: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    /// Correlation token from the backend, if it sent one.
    pub session_id: Option<String>,
}

/// Abstraction over generative model backends.
pub trait ModelClient {
    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl From<&ModelConfig> for SamplingParams {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            max_output_tokens: cfg.max_output_tokens,
        }
    }
}

/// Model families served by the `generateContent` endpoint.
const SUPPORTED_PREFIXES: [&str; 2] = ["gemini-", "learnlm-"];

/// Client for the Gemini `generateContent` REST API.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    params: SamplingParams,
    credentials: Credentials,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, credentials: Credentials) -> Result<Self, ModelError> {
        let model = config.name.trim().to_string();
        if !SUPPORTED_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
        {
            return Err(ModelError::UnknownModel(model));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| ModelError::Connection(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model,
            params: SamplingParams::from(config),
            credentials,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl ModelClient for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model, attachments = request.attachments.len()))]
    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = request_body(request, self.params);
        debug!(prompt_bytes = request.prompt.len(), "sending model request");
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", self.credentials.api_key())
            .json(&body)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
        if !status.is_success() {
            let err = classify_status(status, &text, &self.model);
            warn!(status = status.as_u16(), err = %err, "model request failed");
            return Err(err);
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
        parse_response(&value)
    }
}

/// Build the `generateContent` payload.
pub fn request_body(request: &ModelRequest, params: SamplingParams) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    for attachment in &request.attachments {
        parts.push(match attachment {
            Attachment::Image { mime_type, data } => json!({
                "inline_data": { "mime_type": mime_type, "data": data }
            }),
            Attachment::Text(text) => json!({ "text": text }),
        });
    }
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": params.temperature,
            "topP": params.top_p,
            "topK": params.top_k,
            "maxOutputTokens": params.max_output_tokens,
        }
    })
}

/// Pull the reply text out of a response body.
///
/// A blocked prompt is a rejection. A candidate without text parts yields an
/// empty reply, which the generator treats as retryable.
pub fn parse_response(body: &Value) -> Result<ModelReply, ModelError> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(ModelError::Rejected {
            status: 200,
            message: format!("prompt blocked: {reason}"),
        });
    }
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    let text = parts
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();
    let session_id = body
        .get("responseId")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ModelReply { text, session_id })
}

/// Map a non-success HTTP status to a model error.
pub fn classify_status(status: StatusCode, body: &str, model: &str) -> ModelError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    if status == StatusCode::NOT_FOUND {
        return ModelError::UnknownModel(model.to_string());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ModelError::Status {
            status: status.as_u16(),
            body: message,
        };
    }
    ModelError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn map_transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout(err.to_string())
    } else {
        ModelError::Connection(err.to_string())
    }
}
