//! Pilot configuration stored in `pilot.toml` plus model credentials.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::Mode;

/// Upper bound on executed batches per session, whatever the config says.
pub const MAX_ITERATIONS: u32 = 10;

/// Upper bound on generator attempts per batch, the first included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Configuration problems. All of them stop a command before the first iteration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing model credentials: set one of {vars}")]
    MissingCredentials { vars: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Pilot configuration (TOML).
///
/// Missing fields take the defaults below. The value is built once per command
/// and passed explicitly to the generator and the effectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    /// Environment driven when the CLI does not pass `--mode`.
    pub mode: Mode,

    /// Ceiling on executed batches per session, within `1..=MAX_ITERATIONS`.
    pub max_iterations: u32,

    /// Screenshot file, overwritten on every capture.
    pub screenshot_path: PathBuf,

    /// History entries included in each prompt.
    pub history_limit: usize,

    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub desktop: DesktopConfig,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// API base URL, without the `/models/...` suffix.
    pub endpoint: String,
    /// Credential variables, first non-empty wins.
    pub api_key_env: Vec<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-1.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()],
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total generator attempts, including the first. At most `MAX_ATTEMPTS`.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    /// Screen capture command; the screenshot path is appended.
    pub capture_command: Vec<String>,
    /// Input injection program (`xdotool` compatible).
    pub input_command: String,
    pub command_timeout_secs: u64,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            capture_command: vec![
                "scrot".to_string(),
                "--overwrite".to_string(),
                "--pointer".to_string(),
            ],
            input_command: "xdotool".to_string(),
            command_timeout_secs: 10,
        }
    }
}

impl DesktopConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserConfig {
    /// W3C WebDriver server (e.g. chromedriver).
    pub webdriver_url: String,
    pub headless: bool,
    /// Extra browser arguments for the new session.
    pub args: Vec<String>,
    /// How long selector lookups poll before giving up.
    pub element_timeout_secs: u64,
    /// Snapshot after steps where `index % snapshot_every == 0`.
    pub snapshot_every: usize,
    pub request_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
                "--window-size=1920,1080".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
            ],
            element_timeout_secs: 10,
            snapshot_every: 3,
            request_timeout_secs: 60,
        }
    }
}

impl BrowserConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Desktop,
            max_iterations: MAX_ITERATIONS,
            screenshot_path: PathBuf::from("screenshots/screenshot.png"),
            history_limit: 6,
            model: ModelConfig::default(),
            retry: RetryConfig::default(),
            desktop: DesktopConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if !(1..=MAX_ITERATIONS).contains(&self.max_iterations) {
            return invalid("max_iterations must be within 1..=10");
        }
        if self.screenshot_path.as_os_str().is_empty() {
            return invalid("screenshot_path must not be empty");
        }
        if self.model.name.trim().is_empty() {
            return invalid("model.name must not be empty");
        }
        if url::Url::parse(&self.model.endpoint).is_err() {
            return invalid("model.endpoint must be an absolute URL");
        }
        if self.model.api_key_env.iter().all(|var| var.trim().is_empty()) {
            return invalid("model.api_key_env must name at least one variable");
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return invalid("model.temperature must be within 0..=2");
        }
        if !(0.0..=1.0).contains(&self.model.top_p) {
            return invalid("model.top_p must be within 0..=1");
        }
        if self.model.max_output_tokens == 0 {
            return invalid("model.max_output_tokens must be > 0");
        }
        if self.model.request_timeout_secs == 0 {
            return invalid("model.request_timeout_secs must be > 0");
        }
        if !(1..=MAX_ATTEMPTS).contains(&self.retry.max_attempts) {
            return invalid("retry.max_attempts must be within 1..=3");
        }
        if self.desktop.capture_command.is_empty()
            || self.desktop.capture_command[0].trim().is_empty()
        {
            return invalid("desktop.capture_command must be a non-empty array");
        }
        if self.desktop.input_command.trim().is_empty() {
            return invalid("desktop.input_command must not be empty");
        }
        if self.desktop.command_timeout_secs == 0 {
            return invalid("desktop.command_timeout_secs must be > 0");
        }
        if url::Url::parse(&self.browser.webdriver_url).is_err() {
            return invalid("browser.webdriver_url must be an absolute URL");
        }
        if self.browser.snapshot_every == 0 {
            return invalid("browser.snapshot_every must be > 0");
        }
        if self.browser.request_timeout_secs == 0 {
            return invalid("browser.request_timeout_secs must be > 0");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: PilotConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Load `.env` from the working directory (or a parent) if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(err = %err, "failed to load .env"),
    }
}

/// Model API key and the variable it came from.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    source: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            source: source.into(),
        }
    }

    /// First non-empty variable of `vars` in the process environment.
    pub fn from_env(vars: &[String]) -> Result<Self, ConfigError> {
        Self::from_lookup(vars, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(vars: &[String], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        vars.iter()
            .find_map(|var| {
                lookup(var)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .map(|value| Self::new(value, var.clone()))
            })
            .ok_or_else(|| ConfigError::MissingCredentials {
                vars: vars.join(", "),
            })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}
