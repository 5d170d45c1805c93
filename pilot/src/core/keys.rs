//! Key name mapping shared by the desktop and browser effectors.

use serde::{Deserialize, Serialize};

/// Keys with a semantic code on both effectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Control,
    Shift,
    Alt,
    Meta,
    /// F1 through F12.
    Function(u8),
}

impl NamedKey {
    /// Parse a key name as models tend to write them (`ctrl`, `Return`, `cmd`, `f5`).
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "escape" | "esc" => NamedKey::Escape,
            "backspace" => NamedKey::Backspace,
            "delete" | "del" => NamedKey::Delete,
            "space" | "spacebar" => NamedKey::Space,
            "up" | "arrowup" => NamedKey::Up,
            "down" | "arrowdown" => NamedKey::Down,
            "left" | "arrowleft" => NamedKey::Left,
            "right" | "arrowright" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "pageup" | "pgup" => NamedKey::PageUp,
            "pagedown" | "pgdn" => NamedKey::PageDown,
            "ctrl" | "control" => NamedKey::Control,
            "shift" => NamedKey::Shift,
            "alt" | "option" => NamedKey::Alt,
            "cmd" | "command" | "meta" | "super" | "win" => NamedKey::Meta,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                NamedKey::Function(n)
            }
        };
        Some(key)
    }

    /// X keysym understood by `xdotool key`.
    pub fn xdotool_keysym(self) -> String {
        let sym = match self {
            NamedKey::Enter => "Return",
            NamedKey::Tab => "Tab",
            NamedKey::Escape => "Escape",
            NamedKey::Backspace => "BackSpace",
            NamedKey::Delete => "Delete",
            NamedKey::Space => "space",
            NamedKey::Up => "Up",
            NamedKey::Down => "Down",
            NamedKey::Left => "Left",
            NamedKey::Right => "Right",
            NamedKey::Home => "Home",
            NamedKey::End => "End",
            NamedKey::PageUp => "Prior",
            NamedKey::PageDown => "Next",
            NamedKey::Control => "ctrl",
            NamedKey::Shift => "shift",
            NamedKey::Alt => "alt",
            NamedKey::Meta => "super",
            NamedKey::Function(n) => return format!("F{n}"),
        };
        sym.to_string()
    }

    /// W3C WebDriver key code point.
    pub fn webdriver_code(self) -> char {
        match self {
            NamedKey::Backspace => '\u{E003}',
            NamedKey::Tab => '\u{E004}',
            NamedKey::Enter => '\u{E007}',
            NamedKey::Shift => '\u{E008}',
            NamedKey::Control => '\u{E009}',
            NamedKey::Alt => '\u{E00A}',
            NamedKey::Escape => '\u{E00C}',
            NamedKey::Space => '\u{E00D}',
            NamedKey::PageUp => '\u{E00E}',
            NamedKey::PageDown => '\u{E00F}',
            NamedKey::End => '\u{E010}',
            NamedKey::Home => '\u{E011}',
            NamedKey::Left => '\u{E012}',
            NamedKey::Up => '\u{E013}',
            NamedKey::Right => '\u{E014}',
            NamedKey::Down => '\u{E015}',
            NamedKey::Delete => '\u{E017}',
            NamedKey::Meta => '\u{E03D}',
            // F1..F12 are contiguous from U+E031.
            NamedKey::Function(n) => char::from_u32(0xE030 + u32::from(n)).unwrap_or('\u{E031}'),
        }
    }
}

/// A single key for `press_key` or one element of a `press` chord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyInput {
    Named(NamedKey),
    /// Sent as typed text.
    Literal(String),
}

impl KeyInput {
    /// Mapping for `press_key`: only ENTER, TAB and ESCAPE are semantic;
    /// every other string is literal input.
    pub fn for_press_key(key: &str) -> Self {
        match key.trim().to_ascii_uppercase().as_str() {
            "ENTER" => KeyInput::Named(NamedKey::Enter),
            "TAB" => KeyInput::Named(NamedKey::Tab),
            "ESCAPE" => KeyInput::Named(NamedKey::Escape),
            _ => KeyInput::Literal(key.to_string()),
        }
    }

    /// Mapping for chord members, which accept the full named-key table.
    pub fn for_chord(key: &str) -> Self {
        match NamedKey::parse(key) {
            Some(named) => KeyInput::Named(named),
            None => KeyInput::Literal(key.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_key_maps_only_three_names() {
        assert_eq!(
            KeyInput::for_press_key("enter"),
            KeyInput::Named(NamedKey::Enter)
        );
        assert_eq!(
            KeyInput::for_press_key("Escape"),
            KeyInput::Named(NamedKey::Escape)
        );
        assert_eq!(
            KeyInput::for_press_key("backspace"),
            KeyInput::Literal("backspace".to_string())
        );
    }

    #[test]
    fn chord_members_use_full_table() {
        assert_eq!(KeyInput::for_chord("Ctrl"), KeyInput::Named(NamedKey::Control));
        assert_eq!(KeyInput::for_chord("cmd"), KeyInput::Named(NamedKey::Meta));
        assert_eq!(
            KeyInput::for_chord("f5"),
            KeyInput::Named(NamedKey::Function(5))
        );
        assert_eq!(KeyInput::for_chord("l"), KeyInput::Literal("l".to_string()));
        assert_eq!(KeyInput::for_chord("f13"), KeyInput::Literal("f13".to_string()));
    }

    #[test]
    fn codes_match_webdriver_table() {
        assert_eq!(NamedKey::Enter.webdriver_code(), '\u{E007}');
        assert_eq!(NamedKey::Function(1).webdriver_code(), '\u{E031}');
        assert_eq!(NamedKey::Function(12).webdriver_code(), '\u{E03C}');
        assert_eq!(NamedKey::PageDown.xdotool_keysym(), "Next");
    }
}
