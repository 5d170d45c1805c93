//! Prompt rendering for the action generator.

use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::session::{Message, Role};
use crate::core::types::Mode;

const DESKTOP_TEMPLATE: &str = include_str!("prompts/desktop.md");
const BROWSER_TEMPLATE: &str = include_str!("prompts/browser.md");

/// Inputs for one prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub objective: &'a str,
    /// Current-state summary (browser: URL and title).
    pub state: Option<&'a str>,
    /// Recent history, oldest first. System entries are skipped.
    pub history: &'a [Message],
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    role: &'static str,
    content: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(Mode::Desktop.as_str(), DESKTOP_TEMPLATE)?;
        env.add_template(Mode::Browser.as_str(), BROWSER_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render(&self, mode: Mode, input: &PromptInput<'_>) -> Result<String, minijinja::Error> {
        let history: Vec<HistoryEntry<'_>> = input
            .history
            .iter()
            .filter_map(|message| {
                let role = match message.role {
                    Role::System => return None,
                    Role::User => "result",
                    Role::Assistant => "actions",
                };
                Some(HistoryEntry {
                    role,
                    content: message.content.trim(),
                })
            })
            .collect();
        let template = self.env.get_template(mode.as_str())?;
        let rendered = template.render(context! {
            objective => input.objective.trim(),
            state => input.state.map(str::trim).filter(|s| !s.is_empty()),
            history => (!history.is_empty()).then_some(history),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_prompt_names_objective_and_schema() {
        let engine = PromptEngine::new().expect("engine");
        let rendered = engine
            .render(
                Mode::Desktop,
                &PromptInput {
                    objective: "  open the calculator ",
                    state: None,
                    history: &[],
                },
            )
            .expect("render");
        assert!(rendered.contains("Objective: open the calculator\n"));
        assert!(rendered.contains("\"kind\": \"press\""));
        assert!(rendered.contains("JSON array"));
        assert!(!rendered.contains("Recent steps"));
    }

    #[test]
    fn browser_prompt_includes_state_and_history() {
        let engine = PromptEngine::new().expect("engine");
        let history = vec![
            Message {
                role: Role::System,
                content: "seed".to_string(),
            },
            Message {
                role: Role::Assistant,
                content: r#"[{"kind":"navigate","url":"example.com"}]"#.to_string(),
            },
            Message {
                role: Role::User,
                content: "1 navigate: ok".to_string(),
            },
        ];
        let rendered = engine
            .render(
                Mode::Browser,
                &PromptInput {
                    objective: "find the docs",
                    state: Some("Current URL: https://example.com/\nPage title: Example"),
                    history: &history,
                },
            )
            .expect("render");
        assert!(rendered.contains("Current URL: https://example.com/"));
        assert!(rendered.contains("[actions] [{\"kind\":\"navigate\""));
        assert!(rendered.contains("[result] 1 navigate: ok"));
        assert!(!rendered.contains("seed"));
        assert!(rendered.contains("\"kind\": \"press_key\""));
    }
}
