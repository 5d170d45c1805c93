//! Browser backend speaking the W3C WebDriver protocol (e.g. chromedriver).
//!
//! The driver session is created lazily on first use and deleted on drop.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::keys::KeyInput;
use crate::core::locator::{Locator, text_locators};
use crate::core::pacing::SCROLL_INTO_VIEW_DELAY;
use crate::core::types::{ClickTarget, ScrollDirection, Snapshot};
use crate::io::config::BrowserConfig;
use crate::io::effector::{Effector, EffectorError};
use crate::io::pause::{Pause, ThreadPause};
use crate::io::perception::{PageInfo, Perceive, Perception, PerceptionError};

/// W3C web element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Pixels per scroll step.
const SCROLL_STEP_PX: i64 = 300;

/// Interval between selector lookups while waiting for an element.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One WebDriver HTTP exchange.
///
/// Returns the response's `value` member; error responses map through
/// [`driver_error`].
pub trait Transport {
    fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value, EffectorError>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(config: &BrowserConfig) -> Result<Self, EffectorError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| EffectorError::Driver(err.to_string()))?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %method, url))]
    fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value, EffectorError> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .map_err(|err| EffectorError::Driver(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| EffectorError::Driver(err.to_string()))?;
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(driver_error(status.as_u16(), &parsed));
        }
        Ok(parsed.get("value").cloned().unwrap_or(Value::Null))
    }
}

pub struct BrowserBackend<T: Transport = HttpTransport, S: Pause = ThreadPause> {
    transport: T,
    base_url: String,
    config: BrowserConfig,
    screenshot_path: PathBuf,
    session: RefCell<Option<String>>,
    pause: S,
}

impl BrowserBackend {
    pub fn new(config: &BrowserConfig, screenshot_path: &Path) -> Result<Self, EffectorError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(transport, ThreadPause, config, screenshot_path))
    }
}

impl<T: Transport, S: Pause> BrowserBackend<T, S> {
    pub fn with_transport(
        transport: T,
        pause: S,
        config: &BrowserConfig,
        screenshot_path: &Path,
    ) -> Self {
        Self {
            transport,
            base_url: config.webdriver_url.trim_end_matches('/').to_string(),
            config: config.clone(),
            screenshot_path: screenshot_path.to_path_buf(),
            session: RefCell::new(None),
            pause,
        }
    }

    /// Current driver session, creating one if needed.
    fn session_id(&self) -> Result<String, EffectorError> {
        if let Some(id) = self.session.borrow().as_ref() {
            return Ok(id.clone());
        }
        let value = self.transport.send(
            Method::POST,
            &format!("{}/session", self.base_url),
            Some(capabilities(&self.config)),
        )?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| EffectorError::Driver("new session response has no sessionId".into()))?
            .to_string();
        info!(session = %id, "started browser session");
        *self.session.borrow_mut() = Some(id.clone());
        Ok(id)
    }

    /// Send a command scoped to the session; `path` is relative to `/session/{id}`.
    fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, EffectorError> {
        let id = self.session_id()?;
        let url = format!("{}/session/{id}{path}", self.base_url);
        self.transport.send(method, &url, body)
    }

    /// One lookup; `None` when nothing matches.
    fn find_once(&self, locator: &Locator) -> Result<Option<String>, EffectorError> {
        let body = json!({ "using": locator.strategy(), "value": locator.value() });
        match self.command(Method::POST, "/element", Some(body)) {
            Ok(value) => element_id(&value).map(Some),
            Err(EffectorError::ElementNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Poll until the element appears or the element timeout passes.
    fn find_waiting(&self, locator: &Locator) -> Result<String, EffectorError> {
        let deadline = Instant::now() + self.config.element_timeout();
        loop {
            if let Some(id) = self.find_once(locator)? {
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(EffectorError::ElementNotFound(locator.value().to_string()));
            }
            self.pause.pause(POLL_INTERVAL);
        }
    }

    fn locate(&self, target: &ClickTarget) -> Result<String, EffectorError> {
        match target {
            ClickTarget::Selector(selector) => self.find_waiting(&Locator::Css(selector.clone())),
            ClickTarget::Text(text) => {
                for locator in text_locators(text) {
                    if let Some(id) = self.find_once(&locator)? {
                        debug!(xpath = locator.value(), "matched element by text");
                        return Ok(id);
                    }
                }
                Err(EffectorError::ElementNotFound(format!("text '{text}'")))
            }
            ClickTarget::Point { .. } => Err(EffectorError::Driver(
                "coordinates do not identify an element".to_string(),
            )),
        }
    }

    fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value, EffectorError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn perform_actions(&self, actions: Value) -> Result<(), EffectorError> {
        self.command(Method::POST, "/actions", Some(actions))?;
        self.command(Method::DELETE, "/actions", None)?;
        Ok(())
    }

    fn page_info(&self) -> Result<PageInfo, EffectorError> {
        let url = self.command(Method::GET, "/url", None)?;
        let title = self.command(Method::GET, "/title", None)?;
        let source = self.command(Method::GET, "/source", None)?;
        Ok(PageInfo {
            url: url.as_str().unwrap_or_default().to_string(),
            title: title.as_str().unwrap_or_default().to_string(),
            source_length: source.as_str().map(str::len).unwrap_or_default(),
        })
    }
}

impl<T: Transport, S: Pause> Drop for BrowserBackend<T, S> {
    fn drop(&mut self) {
        if let Some(id) = self.session.get_mut().take() {
            let url = format!("{}/session/{id}", self.base_url);
            if let Err(err) = self.transport.send(Method::DELETE, &url, None) {
                warn!(err = %err, "failed to close browser session");
            }
        }
    }
}

impl<T: Transport, S: Pause> Perceive for BrowserBackend<T, S> {
    fn capture(&self) -> Result<Perception, PerceptionError> {
        self.page_info()
            .map(Perception::Page)
            .map_err(|err| PerceptionError::Browser(err.to_string()))
    }
}

impl<T: Transport, S: Pause> Effector for BrowserBackend<T, S> {
    fn press(&self, keys: &[KeyInput]) -> Result<(), EffectorError> {
        self.perform_actions(chord_actions(keys))
    }

    fn write(&self, text: &str) -> Result<(), EffectorError> {
        self.perform_actions(typing_actions(text))
    }

    #[instrument(skip_all)]
    fn click(&self, target: &ClickTarget) -> Result<(), EffectorError> {
        if let ClickTarget::Point { x, y } = target {
            return self.perform_actions(pointer_click_actions(*x, *y));
        }
        let id = self.locate(target)?;
        self.execute_script(
            "arguments[0].scrollIntoView({block: 'center'});",
            vec![element_ref(&id)],
        )?;
        self.pause.pause(SCROLL_INTO_VIEW_DELAY);
        self.command(Method::POST, &format!("/element/{id}/click"), Some(json!({})))?;
        Ok(())
    }

    fn navigate(&self, url: &str) -> Result<(), EffectorError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn type_text(&self, selector: &str, text: &str) -> Result<(), EffectorError> {
        let id = self.find_waiting(&Locator::Css(selector.to_string()))?;
        self.command(Method::POST, &format!("/element/{id}/clear"), Some(json!({})))?;
        self.command(
            Method::POST,
            &format!("/element/{id}/value"),
            Some(json!({ "text": text })),
        )?;
        Ok(())
    }

    fn scroll_step(&self, direction: ScrollDirection) -> Result<(), EffectorError> {
        let delta = match direction {
            ScrollDirection::Up => -SCROLL_STEP_PX,
            ScrollDirection::Down => SCROLL_STEP_PX,
        };
        self.execute_script("window.scrollBy(0, arguments[0]);", vec![json!(delta)])?;
        Ok(())
    }

    fn press_key(&self, key: &KeyInput) -> Result<(), EffectorError> {
        match key {
            KeyInput::Named(_) => self.perform_actions(chord_actions(std::slice::from_ref(key))),
            KeyInput::Literal(text) => self.perform_actions(typing_actions(text)),
        }
    }

    fn supports_snapshots(&self) -> bool {
        true
    }

    /// Screenshot of the viewport; also overwrites the screenshot file.
    fn snapshot(&self) -> Result<Option<Snapshot>, EffectorError> {
        let value = self.command(Method::GET, "/screenshot", None)?;
        let encoded = value
            .as_str()
            .ok_or_else(|| EffectorError::Driver("screenshot response is not a string".into()))?;
        let png = STANDARD
            .decode(encoded)
            .map_err(|err| EffectorError::Driver(format!("decode screenshot: {err}")))?;
        if let Some(parent) = self.screenshot_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.screenshot_path, &png)?;
        Ok(Some(Snapshot {
            png_base64: encoded.to_string(),
        }))
    }
}

/// New-session capabilities for Chrome.
pub fn capabilities(config: &BrowserConfig) -> Value {
    let mut args = config.args.clone();
    if config.headless && !args.iter().any(|arg| arg.starts_with("--headless")) {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-automation"],
                }
            }
        }
    })
}

pub fn element_ref(id: &str) -> Value {
    json!({ ELEMENT_KEY: id })
}

/// Extract the element id from a find-element result.
pub fn element_id(value: &Value) -> Result<String, EffectorError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EffectorError::Driver("find element response has no element reference".into()))
}

/// Map a WebDriver error response.
pub fn driver_error(status: u16, body: &Value) -> EffectorError {
    let error = body
        .pointer("/value/error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = body
        .pointer("/value/message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if error == "no such element" {
        return EffectorError::ElementNotFound(message.to_string());
    }
    EffectorError::Driver(format!("HTTP {status} {error}: {message}"))
}

fn key_value(key: &KeyInput) -> Vec<String> {
    match key {
        KeyInput::Named(named) => vec![named.webdriver_code().to_string()],
        KeyInput::Literal(text) => text.chars().map(String::from).collect(),
    }
}

fn key_source(actions: Vec<Value>) -> Value {
    json!({
        "actions": [{ "type": "key", "id": "keyboard", "actions": actions }]
    })
}

/// All keys down in order, then released in reverse.
pub fn chord_actions(keys: &[KeyInput]) -> Value {
    let values: Vec<String> = keys.iter().flat_map(key_value).collect();
    let mut actions: Vec<Value> = values
        .iter()
        .map(|value| json!({ "type": "keyDown", "value": value }))
        .collect();
    actions.extend(
        values
            .iter()
            .rev()
            .map(|value| json!({ "type": "keyUp", "value": value })),
    );
    key_source(actions)
}

/// Each character pressed and released in turn.
pub fn typing_actions(text: &str) -> Value {
    let actions: Vec<Value> = text
        .chars()
        .flat_map(|c| {
            let value = c.to_string();
            [
                json!({ "type": "keyDown", "value": value }),
                json!({ "type": "keyUp", "value": value }),
            ]
        })
        .collect();
    key_source(actions)
}

/// Left click at viewport coordinates.
pub fn pointer_click_actions(x: f64, y: f64) -> Value {
    json!({
        "actions": [{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "duration": 0, "origin": "viewport", "x": x.round() as i64, "y": y.round() as i64 },
                { "type": "pointerDown", "button": 0 },
                { "type": "pointerUp", "button": 0 },
            ]
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::NamedKey;
    use std::rc::Rc;

    const DRIVER_URL: &str = "http://driver.test";

    type Log = Rc<RefCell<Vec<String>>>;

    /// Answers WebDriver commands from memory and logs them in order.
    ///
    /// Lookups for a value in `missing` answer `no such element`; every other
    /// lookup finds `el-1`.
    struct ScriptedDriver {
        log: Log,
        missing: Vec<String>,
    }

    impl Transport for ScriptedDriver {
        fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value, EffectorError> {
            let path = url.strip_prefix(DRIVER_URL).unwrap_or(url);
            if path == "/session" {
                self.log.borrow_mut().push("new session".to_string());
                return Ok(json!({ "sessionId": "s1" }));
            }
            let path = match path.strip_prefix("/session/s1") {
                Some("") => "/",
                Some(rest) => rest,
                None => path,
            };
            if path == "/element" {
                let value = body
                    .as_ref()
                    .and_then(|b| b["value"].as_str())
                    .unwrap_or_default()
                    .to_string();
                self.log.borrow_mut().push(format!("find {value}"));
                if self.missing.contains(&value) {
                    return Err(driver_error(
                        404,
                        &json!({ "value": { "error": "no such element", "message": value } }),
                    ));
                }
                return Ok(element_ref("el-1"));
            }
            self.log.borrow_mut().push(format!("{method} {path}"));
            Ok(Value::Null)
        }
    }

    struct LoggedPause(Log);

    impl Pause for LoggedPause {
        fn pause(&self, duration: Duration) {
            self.0.borrow_mut().push(format!("pause {}ms", duration.as_millis()));
        }
    }

    fn backend(missing: &[String]) -> (BrowserBackend<ScriptedDriver, LoggedPause>, Log) {
        let log: Log = Rc::default();
        let driver = ScriptedDriver {
            log: Rc::clone(&log),
            missing: missing.to_vec(),
        };
        let config = BrowserConfig {
            webdriver_url: format!("{DRIVER_URL}/"),
            element_timeout_secs: 0,
            ..BrowserConfig::default()
        };
        let backend = BrowserBackend::with_transport(
            driver,
            LoggedPause(Rc::clone(&log)),
            &config,
            Path::new("screenshot.png"),
        );
        (backend, log)
    }

    fn xpaths(text: &str) -> Vec<String> {
        text_locators(text)
            .iter()
            .map(|locator| locator.value().to_string())
            .collect()
    }

    #[test]
    fn text_click_stops_at_first_matching_tag() {
        let lookups = xpaths("Sign in");
        let (backend, log) = backend(&lookups[..2]);

        backend
            .click(&ClickTarget::Text("Sign in".to_string()))
            .expect("click");

        assert_eq!(
            *log.borrow(),
            vec![
                "new session".to_string(),
                format!("find {}", lookups[0]),
                format!("find {}", lookups[1]),
                format!("find {}", lookups[2]),
                "POST /execute/sync".to_string(),
                "pause 500ms".to_string(),
                "POST /element/el-1/click".to_string(),
            ]
        );
    }

    #[test]
    fn text_click_without_match_tries_every_tag_once() {
        let lookups = xpaths("Nowhere");
        let (backend, log) = backend(&lookups);

        let err = backend
            .click(&ClickTarget::Text("Nowhere".to_string()))
            .unwrap_err();

        assert!(matches!(err, EffectorError::ElementNotFound(ref msg) if msg.contains("Nowhere")));
        let finds = log.borrow().iter().filter(|e| e.starts_with("find ")).count();
        assert_eq!(finds, 5);
        assert!(!log.borrow().iter().any(|e| e.ends_with("/click")));
    }

    #[test]
    fn selector_click_scrolls_into_view_then_pauses() {
        let (backend, log) = backend(&[]);

        backend
            .click(&ClickTarget::Selector("#submit".to_string()))
            .expect("click");

        assert_eq!(
            log.borrow()[1..],
            [
                "find #submit".to_string(),
                "POST /execute/sync".to_string(),
                "pause 500ms".to_string(),
                "POST /element/el-1/click".to_string(),
            ]
        );
    }

    #[test]
    fn type_text_clears_before_sending_keys() {
        let (backend, log) = backend(&[]);

        backend.type_text("input[name=q]", "rust").expect("type");

        assert_eq!(
            log.borrow()[1..],
            [
                "find input[name=q]".to_string(),
                "POST /element/el-1/clear".to_string(),
                "POST /element/el-1/value".to_string(),
            ]
        );
    }

    #[test]
    fn type_text_into_missing_field_fails_without_typing() {
        let (backend, log) = backend(&["#gone".to_string()]);

        let err = backend.type_text("#gone", "rust").unwrap_err();

        assert!(matches!(err, EffectorError::ElementNotFound(_)));
        assert!(!log.borrow().iter().any(|e| e.ends_with("/value")));
    }

    #[test]
    fn dropping_backend_deletes_session() {
        let (backend, log) = backend(&[]);
        backend.navigate("https://example.com").expect("navigate");
        drop(backend);

        assert_eq!(
            *log.borrow(),
            vec![
                "new session".to_string(),
                "POST /url".to_string(),
                "DELETE /".to_string(),
            ]
        );
    }

    #[test]
    fn headless_adds_flag_once() {
        let config = BrowserConfig {
            headless: true,
            ..BrowserConfig::default()
        };
        let caps = capabilities(&config);
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .expect("args");
        assert_eq!(
            args.iter().filter(|a| a.as_str() == Some("--headless=new")).count(),
            1
        );
        assert!(args.iter().any(|a| a == "--window-size=1920,1080"));
    }

    #[test]
    fn chord_releases_in_reverse() {
        let value = chord_actions(&[
            KeyInput::Named(NamedKey::Control),
            KeyInput::Literal("a".to_string()),
        ]);
        let actions = value["actions"][0]["actions"].as_array().expect("actions");
        let steps: Vec<(String, String)> = actions
            .iter()
            .map(|a| {
                (
                    a["type"].as_str().unwrap_or_default().to_string(),
                    a["value"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                ("keyDown".to_string(), "\u{E009}".to_string()),
                ("keyDown".to_string(), "a".to_string()),
                ("keyUp".to_string(), "a".to_string()),
                ("keyUp".to_string(), "\u{E009}".to_string()),
            ]
        );
    }

    #[test]
    fn typing_presses_each_character() {
        let value = typing_actions("hi");
        assert_eq!(value["actions"][0]["actions"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn pointer_click_targets_viewport() {
        let value = pointer_click_actions(10.2, 20.7);
        let moves = &value["actions"][0]["actions"][0];
        assert_eq!(moves["x"], 10);
        assert_eq!(moves["y"], 21);
        assert_eq!(moves["origin"], "viewport");
    }

    #[test]
    fn element_reference_round_trip() {
        assert_eq!(element_id(&element_ref("abc")).expect("id"), "abc");
        assert!(element_id(&json!({})).is_err());
    }

    #[test]
    fn no_such_element_maps_to_not_found() {
        let body = json!({ "value": { "error": "no such element", "message": "#missing" } });
        assert!(matches!(
            driver_error(404, &body),
            EffectorError::ElementNotFound(msg) if msg == "#missing"
        ));
        let other = json!({ "value": { "error": "invalid session id", "message": "gone" } });
        assert_eq!(
            driver_error(404, &other).to_string(),
            "browser driver error: HTTP 404 invalid session id: gone"
        );
    }
}
