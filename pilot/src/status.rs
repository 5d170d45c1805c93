//! Readiness check behind `pilot status`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use crate::core::types::Mode;
use crate::exit_codes;
use crate::io::config::{Credentials, PilotConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverStatus {
    pub url: String,
    pub ready: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub config_path: PathBuf,
    pub config_found: bool,
    pub mode: Mode,
    pub model: String,
    /// Variable the API key was read from.
    pub credentials: Option<String>,
    pub max_iterations: u32,
    pub screenshot_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdriver: Option<DriverStatus>,
}

impl StatusReport {
    pub fn ready(&self) -> bool {
        self.credentials.is_some() && self.webdriver.as_ref().is_none_or(|d| d.ready)
    }

    pub fn exit_code(&self) -> i32 {
        if self.ready() {
            exit_codes::OK
        } else {
            exit_codes::CONFIG
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!(
                "config: {}{}",
                self.config_path.display(),
                if self.config_found { "" } else { " (defaults)" }
            ),
            format!("mode: {}", self.mode),
            format!("model: {}", self.model),
            format!(
                "credentials: {}",
                self.credentials.as_deref().unwrap_or("missing")
            ),
            format!("max_iterations: {}", self.max_iterations),
            format!("screenshot: {}", self.screenshot_path.display()),
        ];
        if let Some(driver) = &self.webdriver {
            lines.push(format!(
                "webdriver: {} ({})",
                driver.url,
                if driver.ready { "ready" } else { driver.message.as_str() }
            ));
        }
        lines.join("\n")
    }
}

/// Inspect configuration, credentials and, in browser mode, the driver.
pub fn check_status(config_path: &Path, config: &PilotConfig, mode: Mode) -> StatusReport {
    let credentials = Credentials::from_env(&config.model.api_key_env)
        .ok()
        .map(|creds| creds.source().to_string());
    let webdriver = (mode == Mode::Browser).then(|| probe_driver(&config.browser.webdriver_url));
    StatusReport {
        config_path: config_path.to_path_buf(),
        config_found: config_path.exists(),
        mode,
        model: config.model.name.clone(),
        credentials,
        max_iterations: config.max_iterations,
        screenshot_path: config.screenshot_path.clone(),
        webdriver,
    }
}

/// `GET /status` on the driver.
fn probe_driver(base_url: &str) -> DriverStatus {
    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let result = Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .and_then(|client| client.get(&url).send())
        .and_then(|response| response.json::<Value>());
    let (ready, message) = match result {
        Ok(body) => (
            body.pointer("/value/ready").and_then(Value::as_bool).unwrap_or(false),
            body.pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        Err(err) => (false, err.to_string()),
    };
    DriverStatus {
        url: base_url.to_string(),
        ready,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(credentials: Option<&str>, webdriver: Option<bool>) -> StatusReport {
        StatusReport {
            config_path: PathBuf::from("pilot.toml"),
            config_found: false,
            mode: Mode::Desktop,
            model: "gemini-1.5-flash".to_string(),
            credentials: credentials.map(str::to_string),
            max_iterations: 10,
            screenshot_path: PathBuf::from("screenshots/screenshot.png"),
            webdriver: webdriver.map(|ready| DriverStatus {
                url: "http://localhost:9515".to_string(),
                ready,
                message: "connection refused".to_string(),
            }),
        }
    }

    #[test]
    fn ready_needs_credentials_and_driver() {
        assert_eq!(report(Some("GEMINI_API_KEY"), None).exit_code(), exit_codes::OK);
        assert_eq!(report(None, None).exit_code(), exit_codes::CONFIG);
        assert_eq!(
            report(Some("GEMINI_API_KEY"), Some(false)).exit_code(),
            exit_codes::CONFIG
        );
        assert!(report(Some("GEMINI_API_KEY"), Some(true)).ready());
    }

    #[test]
    fn render_lists_missing_pieces() {
        let text = report(None, Some(false)).render();
        assert!(text.contains("config: pilot.toml (defaults)"));
        assert!(text.contains("credentials: missing"));
        assert!(text.contains("webdriver: http://localhost:9515 (connection refused)"));
    }
}
