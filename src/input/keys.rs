//! Virtual keys, keybinds and the emergency-stop hotkey.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{PilotError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// A virtual key the controller can hold. Mouse buttons count as keys so the held set
/// covers continuous fire too.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Keyboard(String),
    Mouse(MouseButton),
}

fn key_name_re() -> &'static Regex {
    static KEY_NAME_RE: OnceLock<Regex> = OnceLock::new();
    KEY_NAME_RE.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9]|[a-z][a-z0-9_]{1,15})$").expect("static key name pattern")
    })
}

impl Key {
    /// Parse a keybind name. `left`, `right` and `middle` (optionally suffixed with
    /// `_mouse`) are mouse buttons; anything else is a keyboard key name.
    pub fn parse(name: &str) -> Result<Key> {
        let name = name.trim().to_lowercase();
        let button = match name.as_str() {
            "left" | "left_mouse" | "mouse1" => Some(MouseButton::Left),
            "right" | "right_mouse" | "mouse2" => Some(MouseButton::Right),
            "middle" | "middle_mouse" | "mouse3" => Some(MouseButton::Middle),
            _ => None,
        };
        if let Some(button) = button {
            return Ok(Key::Mouse(button));
        }
        if !key_name_re().is_match(&name) {
            return Err(PilotError::Config(format!("invalid key name '{}'", name)));
        }
        Ok(Key::Keyboard(name))
    }

    pub fn is_mouse(&self) -> bool {
        matches!(self, Key::Mouse(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Keyboard(name) => f.write_str(name),
            Key::Mouse(MouseButton::Left) => f.write_str("mouse:left"),
            Key::Mouse(MouseButton::Middle) => f.write_str("mouse:middle"),
            Key::Mouse(MouseButton::Right) => f.write_str("mouse:right"),
        }
    }
}

// ----------------------------------------------------------------------------
// KeyBinds
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBinds {
    pub move_up: Key,
    pub move_down: Key,
    pub move_left: Key,
    pub move_right: Key,
    pub attack: Key,
    pub nexus: Key,
}

impl Default for KeyBinds {
    fn default() -> Self {
        Self {
            move_up: Key::Keyboard("w".into()),
            move_down: Key::Keyboard("s".into()),
            move_left: Key::Keyboard("a".into()),
            move_right: Key::Keyboard("d".into()),
            attack: Key::Mouse(MouseButton::Left),
            nexus: Key::Keyboard("r".into()),
        }
    }
}

impl KeyBinds {
    /// Every bind must be distinct, otherwise releasing one direction would release another.
    pub fn validate(&self) -> Result<()> {
        let all = self.all();
        for (i, a) in all.iter().enumerate() {
            if all[i + 1..].contains(a) {
                return Err(PilotError::Config(format!("key '{}' is bound twice", a)));
            }
        }
        for movement in [&self.move_up, &self.move_down, &self.move_left, &self.move_right] {
            if movement.is_mouse() {
                return Err(PilotError::Config(format!(
                    "movement cannot be bound to {}",
                    movement
                )));
            }
        }
        Ok(())
    }

    pub fn all(&self) -> [&Key; 6] {
        [
            &self.move_up,
            &self.move_down,
            &self.move_left,
            &self.move_right,
            &self.attack,
            &self.nexus,
        ]
    }
}

// ----------------------------------------------------------------------------
// KeyCombo (emergency stop hotkey)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub key: String,
}

impl KeyCombo {
    /// Parse `ctrl+q`, `ctrl+shift+f12`, `escape`. Modifier order is free; exactly one
    /// non-modifier key is required.
    pub fn parse(spec: &str) -> Result<KeyCombo> {
        let mut combo = KeyCombo {
            ctrl: false,
            alt: false,
            shift: false,
            key: String::new(),
        };
        for part in spec.split('+').map(|p| p.trim().to_lowercase()) {
            match part.as_str() {
                "ctrl" | "control" => combo.ctrl = true,
                "alt" => combo.alt = true,
                "shift" => combo.shift = true,
                "" => return Err(PilotError::Config(format!("empty key in hotkey '{}'", spec))),
                other => {
                    if !combo.key.is_empty() {
                        return Err(PilotError::Config(format!(
                            "hotkey '{}' names more than one key",
                            spec
                        )));
                    }
                    if !key_name_re().is_match(other) {
                        return Err(PilotError::Config(format!("invalid hotkey key '{}'", other)));
                    }
                    combo.key = other.to_string();
                }
            }
        }
        if combo.key.is_empty() {
            return Err(PilotError::Config(format!("hotkey '{}' has no key", spec)));
        }
        Ok(combo)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("ctrl+")?;
        }
        if self.alt {
            f.write_str("alt+")?;
        }
        if self.shift {
            f.write_str("shift+")?;
        }
        f.write_str(&self.key)
    }
}
