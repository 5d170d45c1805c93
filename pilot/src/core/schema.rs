//! Operation schema validation.
//!
//! Turns a loosely-typed [`RawOperation`] into an [`Operation`]:
//! - unknown or missing kinds are terminal for the batch;
//! - known kinds missing a structurally required field are inexecutable and
//!   fail only their own step;
//! - every other absent field takes its default.

use serde_json::Value;
use thiserror::Error;

use crate::core::keys::KeyInput;
use crate::core::pacing::{
    DEFAULT_SCROLL_AMOUNT, DEFAULT_WAIT_SECS, MAX_SCROLL_AMOUNT, MAX_WAIT_SECS,
};
use crate::core::types::{ClickTarget, Operation, OperationKind, RawOperation, ScrollDirection};

/// Discriminator fields, in lookup order. `kind` is canonical.
const KIND_FIELDS: [&str; 3] = ["kind", "operation", "action"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("operation has no kind")]
    MissingKind,
    #[error("unknown operation kind '{0}'")]
    UnknownKind(String),
    #[error("{kind} operation is inexecutable: {reason}")]
    Inexecutable {
        kind: &'static str,
        reason: String,
    },
}

impl SchemaError {
    /// Whether the error must stop the batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchemaError::MissingKind | SchemaError::UnknownKind(_))
    }
}

/// The discriminator as written, if any.
pub fn raw_kind(raw: &RawOperation) -> Option<&str> {
    KIND_FIELDS
        .iter()
        .find_map(|field| raw.get(*field).and_then(Value::as_str))
}

/// Display label for outcomes: the normalized kind, or the raw string.
pub fn kind_label(raw: &RawOperation) -> String {
    match raw_kind(raw) {
        Some(kind) => match OperationKind::parse(kind) {
            Some(parsed) => parsed.as_str().to_string(),
            None => kind.trim().to_string(),
        },
        None => "<missing>".to_string(),
    }
}

/// Validate a raw operation against the schema.
pub fn validate(raw: &RawOperation) -> Result<Operation, SchemaError> {
    let kind_str = raw_kind(raw).ok_or(SchemaError::MissingKind)?;
    let kind = OperationKind::parse(kind_str)
        .ok_or_else(|| SchemaError::UnknownKind(kind_str.trim().to_string()))?;
    let fields = Fields { raw, kind };

    let operation = match kind {
        OperationKind::Press | OperationKind::Hotkey => {
            let keys = fields.keys()?;
            if keys.is_empty() {
                return Err(fields.inexecutable("keys must be a non-empty list"));
            }
            Operation::Press { keys }
        }
        OperationKind::Write => Operation::Write {
            content: fields.text("content")?.unwrap_or_default(),
        },
        OperationKind::Click => Operation::Click(fields.click_target()?),
        OperationKind::Navigate => {
            let url = fields.text("url")?.unwrap_or_default();
            if url.trim().is_empty() {
                return Err(fields.inexecutable("url is required"));
            }
            Operation::Navigate { url }
        }
        OperationKind::Type => {
            let selector = fields
                .non_empty_text("selector")?
                .ok_or_else(|| fields.inexecutable("selector is required"))?;
            Operation::Type {
                selector,
                text: fields.text("text")?.unwrap_or_default(),
            }
        }
        OperationKind::Scroll => Operation::Scroll {
            direction: fields.direction()?,
            amount: match fields.number("amount")? {
                Some(n) if !(0.0..=f64::from(MAX_SCROLL_AMOUNT)).contains(&n) => {
                    return Err(fields.inexecutable(format!(
                        "amount must be within 0..={MAX_SCROLL_AMOUNT}"
                    )));
                }
                Some(n) => n.round() as u32,
                None => DEFAULT_SCROLL_AMOUNT,
            },
        },
        OperationKind::PressKey => {
            let key = fields
                .non_empty_text("key")?
                .ok_or_else(|| fields.inexecutable("key is required"))?;
            Operation::PressKey(KeyInput::for_press_key(&key))
        }
        OperationKind::Wait => Operation::Wait {
            seconds: match fields.number("seconds")? {
                Some(n) if n < 0.0 || !n.is_finite() => {
                    return Err(fields.inexecutable("seconds must be >= 0"));
                }
                Some(n) if n > MAX_WAIT_SECS => {
                    return Err(fields.inexecutable(format!("seconds must be <= {MAX_WAIT_SECS}")));
                }
                Some(n) => n,
                None => DEFAULT_WAIT_SECS,
            },
        },
        OperationKind::Done => Operation::Done {
            summary: fields.text("summary")?.unwrap_or_default(),
        },
    };
    Ok(operation)
}

/// Typed field accessors for one operation. `null` counts as absent.
struct Fields<'a> {
    raw: &'a RawOperation,
    kind: OperationKind,
}

impl Fields<'_> {
    fn get(&self, name: &str) -> Option<&Value> {
        self.raw.get(name).filter(|value| !value.is_null())
    }

    fn inexecutable(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::Inexecutable {
            kind: self.kind.as_str(),
            reason: reason.into(),
        }
    }

    fn text(&self, name: &str) -> Result<Option<String>, SchemaError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(self.inexecutable(format!("{name} must be a string"))),
        }
    }

    fn non_empty_text(&self, name: &str) -> Result<Option<String>, SchemaError> {
        Ok(self.text(name)?.filter(|s| !s.trim().is_empty()))
    }

    /// JSON number or numeric string.
    fn number(&self, name: &str) -> Result<Option<f64>, SchemaError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.inexecutable(format!("{name} is out of range"))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.inexecutable(format!("{name} must be numeric, got '{s}'"))),
            Some(_) => Err(self.inexecutable(format!("{name} must be numeric"))),
        }
    }

    /// `keys` as a list of names; a lone string is a one-key chord.
    fn keys(&self) -> Result<Vec<String>, SchemaError> {
        match self.get("keys") {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(self.inexecutable("keys must contain only strings")),
                })
                .filter(|key| !matches!(key, Ok(k) if k.trim().is_empty()))
                .collect(),
            Some(_) => Err(self.inexecutable("keys must be a list of strings")),
        }
    }

    fn click_target(&self) -> Result<ClickTarget, SchemaError> {
        let x = self.number("x")?;
        let y = self.number("y")?;
        if let (Some(x), Some(y)) = (x, y) {
            return Ok(ClickTarget::Point { x, y });
        }
        if let Some(selector) = self.non_empty_text("selector")? {
            return Ok(ClickTarget::Selector(selector));
        }
        if let Some(text) = self.non_empty_text("text")? {
            return Ok(ClickTarget::Text(text));
        }
        Err(self.inexecutable("needs x and y, a selector, or text"))
    }

    fn direction(&self) -> Result<ScrollDirection, SchemaError> {
        match self.text("direction")? {
            None => Ok(ScrollDirection::Down),
            Some(dir) => match dir.trim().to_ascii_lowercase().as_str() {
                "down" => Ok(ScrollDirection::Down),
                "up" => Ok(ScrollDirection::Up),
                other => Err(self.inexecutable(format!("unknown direction '{other}'"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::NamedKey;
    use serde_json::json;

    fn raw(value: Value) -> RawOperation {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn kind_is_case_insensitive_and_aliases_are_accepted() {
        let op = validate(&raw(json!({"kind": "DONE", "summary": "ok"}))).expect("valid");
        assert_eq!(
            op,
            Operation::Done {
                summary: "ok".to_string()
            }
        );
        let op = validate(&raw(json!({"operation": "write", "content": "hi"}))).expect("valid");
        assert_eq!(
            op,
            Operation::Write {
                content: "hi".to_string()
            }
        );
        let op = validate(&raw(json!({"action": "navigate", "url": "example.com"}))).expect("valid");
        assert_eq!(
            op,
            Operation::Navigate {
                url: "example.com".to_string()
            }
        );
    }

    #[test]
    fn unknown_and_missing_kinds_are_terminal() {
        let err = validate(&raw(json!({"kind": "unknown_op"}))).unwrap_err();
        assert_eq!(err, SchemaError::UnknownKind("unknown_op".to_string()));
        assert!(err.is_terminal());

        let err = validate(&raw(json!({"x": 1}))).unwrap_err();
        assert_eq!(err, SchemaError::MissingKind);
        assert!(err.is_terminal());

        let err = validate(&raw(json!({"kind": 3}))).unwrap_err();
        assert_eq!(err, SchemaError::MissingKind);
    }

    #[test]
    fn click_without_target_is_inexecutable_not_terminal() {
        let err = validate(&raw(json!({"kind": "click"}))).unwrap_err();
        assert!(matches!(err, SchemaError::Inexecutable { kind: "click", .. }));
        assert!(!err.is_terminal());

        let err = validate(&raw(json!({"kind": "click", "x": 10}))).unwrap_err();
        assert!(matches!(err, SchemaError::Inexecutable { .. }));
    }

    #[test]
    fn click_prefers_coordinates_then_selector_then_text() {
        let op = validate(&raw(json!({"kind": "click", "x": "100", "y": 200, "text": "Go"})))
            .expect("valid");
        assert_eq!(op, Operation::Click(ClickTarget::Point { x: 100.0, y: 200.0 }));

        let op = validate(&raw(json!({"kind": "click", "selector": "#go", "text": "Go"})))
            .expect("valid");
        assert_eq!(op, Operation::Click(ClickTarget::Selector("#go".to_string())));

        let op = validate(&raw(json!({"kind": "click", "text": "Go"}))).expect("valid");
        assert_eq!(op, Operation::Click(ClickTarget::Text("Go".to_string())));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        assert_eq!(
            validate(&raw(json!({"kind": "scroll"}))).expect("valid"),
            Operation::Scroll {
                direction: ScrollDirection::Down,
                amount: 3
            }
        );
        assert_eq!(
            validate(&raw(json!({"kind": "wait"}))).expect("valid"),
            Operation::Wait { seconds: 1.0 }
        );
        assert_eq!(
            validate(&raw(json!({"kind": "done"}))).expect("valid"),
            Operation::Done {
                summary: String::new()
            }
        );
        assert_eq!(
            validate(&raw(json!({"kind": "type", "selector": "input"}))).expect("valid"),
            Operation::Type {
                selector: "input".to_string(),
                text: String::new()
            }
        );
    }

    #[test]
    fn structurally_required_fields() {
        for value in [
            json!({"kind": "press"}),
            json!({"kind": "hotkey", "keys": []}),
            json!({"kind": "navigate"}),
            json!({"kind": "navigate", "url": "  "}),
            json!({"kind": "type", "text": "hello"}),
            json!({"kind": "press_key"}),
            json!({"kind": "wait", "seconds": -1}),
            json!({"kind": "wait", "seconds": 1e9}),
            json!({"kind": "scroll", "direction": "sideways"}),
        ] {
            let err = validate(&raw(value.clone())).unwrap_err();
            assert!(!err.is_terminal(), "{value}");
        }
    }

    #[test]
    fn press_key_and_chords() {
        assert_eq!(
            validate(&raw(json!({"kind": "press_key", "key": "enter"}))).expect("valid"),
            Operation::PressKey(KeyInput::Named(NamedKey::Enter))
        );
        assert_eq!(
            validate(&raw(json!({"kind": "hotkey", "keys": ["ctrl", "l"]}))).expect("valid"),
            Operation::Press {
                keys: vec!["ctrl".to_string(), "l".to_string()]
            }
        );
        assert_eq!(
            validate(&raw(json!({"kind": "press", "keys": "enter"}))).expect("valid"),
            Operation::Press {
                keys: vec!["enter".to_string()]
            }
        );
    }

    #[test]
    fn labels_normalize_known_kinds() {
        assert_eq!(kind_label(&raw(json!({"kind": "Hotkey"}))), "hotkey");
        assert_eq!(kind_label(&raw(json!({"kind": "fly"}))), "fly");
        assert_eq!(kind_label(&raw(json!({}))), "<missing>");
    }
}
