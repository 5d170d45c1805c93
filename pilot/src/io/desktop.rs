//! Desktop backend: screen capture command for perception, `xdotool` for input.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument};

use crate::core::keys::KeyInput;
use crate::core::types::{ClickTarget, Mode, ScrollDirection};
use crate::io::config::DesktopConfig;
use crate::io::effector::{Effector, EffectorError};
use crate::io::perception::{Perceive, Perception, PerceptionError};
use crate::io::process::run_with_timeout;

/// X button numbers for the scroll wheel.
const WHEEL_UP: &str = "4";
const WHEEL_DOWN: &str = "5";

/// Delay between typed characters, in milliseconds.
const TYPE_DELAY_MS: &str = "12";

pub struct DesktopBackend {
    config: DesktopConfig,
    screenshot_path: PathBuf,
}

impl DesktopBackend {
    pub fn new(config: &DesktopConfig, screenshot_path: &Path) -> Self {
        Self {
            config: config.clone(),
            screenshot_path: screenshot_path.to_path_buf(),
        }
    }

    #[instrument(skip_all, fields(args = ?args))]
    fn input(&self, args: &[String]) -> Result<(), EffectorError> {
        let mut cmd = Command::new(&self.config.input_command);
        cmd.args(args);
        let output = run_with_timeout(cmd, self.config.command_timeout())
            .map_err(|err| EffectorError::Command(format!("{err:#}")))?;
        if output.timed_out {
            return Err(EffectorError::Command(format!(
                "{} timed out after {}s",
                self.config.input_command, self.config.command_timeout_secs
            )));
        }
        if !output.status.success() {
            return Err(EffectorError::Command(format!(
                "{} exited with {:?}: {}",
                self.config.input_command,
                output.status.code(),
                output.diagnostic_text()
            )));
        }
        Ok(())
    }
}

impl Perceive for DesktopBackend {
    #[instrument(skip_all, fields(path = %self.screenshot_path.display()))]
    fn capture(&self) -> Result<Perception, PerceptionError> {
        let path = &self.screenshot_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PerceptionError::Read {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let (program, rest) = self
            .config
            .capture_command
            .split_first()
            .ok_or_else(|| PerceptionError::Capture("empty capture command".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(rest).arg(path);
        let output = run_with_timeout(cmd, self.config.command_timeout())
            .map_err(|err| PerceptionError::Capture(format!("{err:#}")))?;
        if !output.success() {
            return Err(PerceptionError::Capture(format!(
                "{program} failed (timed out: {}): {}",
                output.timed_out,
                output.diagnostic_text()
            )));
        }
        let png = fs::read(path).map_err(|source| PerceptionError::Read {
            path: path.clone(),
            source,
        })?;
        debug!(bytes = png.len(), "captured screen");
        Ok(Perception::Screen {
            png,
            path: path.clone(),
        })
    }
}

impl Effector for DesktopBackend {
    fn press(&self, keys: &[KeyInput]) -> Result<(), EffectorError> {
        self.input(&chord_args(keys))
    }

    fn write(&self, text: &str) -> Result<(), EffectorError> {
        self.input(&type_args(text))
    }

    fn click(&self, target: &ClickTarget) -> Result<(), EffectorError> {
        match target {
            ClickTarget::Point { x, y } => self.input(&click_args(*x, *y)),
            ClickTarget::Selector(_) | ClickTarget::Text(_) => Err(EffectorError::Unsupported {
                operation: "click by selector or text",
                mode: Mode::Desktop,
            }),
        }
    }

    fn navigate(&self, _url: &str) -> Result<(), EffectorError> {
        Err(EffectorError::Unsupported {
            operation: "navigate",
            mode: Mode::Desktop,
        })
    }

    fn type_text(&self, _selector: &str, _text: &str) -> Result<(), EffectorError> {
        Err(EffectorError::Unsupported {
            operation: "type",
            mode: Mode::Desktop,
        })
    }

    fn scroll_step(&self, direction: ScrollDirection) -> Result<(), EffectorError> {
        let button = match direction {
            ScrollDirection::Up => WHEEL_UP,
            ScrollDirection::Down => WHEEL_DOWN,
        };
        self.input(&["click".to_string(), button.to_string()])
    }

    fn press_key(&self, key: &KeyInput) -> Result<(), EffectorError> {
        match key {
            KeyInput::Named(named) => {
                self.input(&["key".to_string(), named.xdotool_keysym()])
            }
            KeyInput::Literal(text) => self.input(&type_args(text)),
        }
    }
}

/// `xdotool key` arguments for keys pressed together, e.g. `ctrl+l`.
pub fn chord_args(keys: &[KeyInput]) -> Vec<String> {
    let chord = keys
        .iter()
        .map(|key| match key {
            KeyInput::Named(named) => named.xdotool_keysym(),
            KeyInput::Literal(text) => text.clone(),
        })
        .collect::<Vec<_>>()
        .join("+");
    vec!["key".to_string(), "--clearmodifiers".to_string(), chord]
}

pub fn type_args(text: &str) -> Vec<String> {
    vec![
        "type".to_string(),
        "--delay".to_string(),
        TYPE_DELAY_MS.to_string(),
        "--".to_string(),
        text.to_string(),
    ]
}

/// Move to the rounded point and left-click.
pub fn click_args(x: f64, y: f64) -> Vec<String> {
    vec![
        "mousemove".to_string(),
        "--sync".to_string(),
        format!("{}", x.round() as i64),
        format!("{}", y.round() as i64),
        "click".to_string(),
        "1".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::NamedKey;

    #[test]
    fn chord_joins_keysyms() {
        let args = chord_args(&[
            KeyInput::Named(NamedKey::Control),
            KeyInput::Named(NamedKey::Shift),
            KeyInput::Literal("t".to_string()),
        ]);
        assert_eq!(args, vec!["key", "--clearmodifiers", "ctrl+shift+t"]);
    }

    #[test]
    fn click_rounds_coordinates() {
        assert_eq!(
            click_args(100.4, 199.6),
            vec!["mousemove", "--sync", "100", "200", "click", "1"]
        );
    }

    #[test]
    fn text_after_option_terminator() {
        assert_eq!(type_args("-rf")[3..], ["--", "-rf"]);
    }

    #[test]
    fn browser_only_operations_are_unsupported() {
        let backend = DesktopBackend::new(
            &DesktopConfig::default(),
            Path::new("screenshots/screenshot.png"),
        );
        assert!(matches!(
            backend.navigate("https://example.com"),
            Err(EffectorError::Unsupported { .. })
        ));
        assert!(matches!(
            backend.click(&ClickTarget::Text("OK".to_string())),
            Err(EffectorError::Unsupported { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn capture_reads_file_written_by_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shots/screen.png");
        let config = DesktopConfig {
            capture_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf png > \"$0\"".to_string(),
            ],
            ..DesktopConfig::default()
        };
        let backend = DesktopBackend::new(&config, &path);
        let perception = backend.capture().expect("capture");
        assert_eq!(
            perception,
            Perception::Screen {
                png: b"png".to_vec(),
                path: path.clone(),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_input_command_is_reported() {
        let config = DesktopConfig {
            input_command: "false".to_string(),
            ..DesktopConfig::default()
        };
        let backend = DesktopBackend::new(&config, Path::new("unused.png"));
        let err = backend.write("hello").unwrap_err();
        assert!(matches!(err, EffectorError::Command(_)), "{err}");
    }
}
