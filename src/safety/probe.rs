//! Sources of operator input events.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::input::{InputBackend, XdotoolBackend};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorEvent {
    /// Key or button transition observed on the desktop. `key` uses keybind names.
    Key { key: String, pressed: bool },
    /// Current pointer position in screen coordinates.
    PointerAt { x: i32, y: i32 },
}

pub trait OperatorProbe: Send {
    fn name(&self) -> &'static str;

    /// Whether `poll` can return `OperatorEvent::Key` at all.
    fn reports_keys(&self) -> bool {
        false
    }

    /// Events observed since the previous poll.
    fn poll(&mut self) -> Result<Vec<OperatorEvent>>;
}

fn is_modifier(key: &str) -> bool {
    matches!(
        key,
        "ctrl" | "control" | "control_l" | "control_r" | "alt" | "alt_l" | "alt_r" | "shift"
            | "shift_l" | "shift_r"
    )
}

/// Key events that turn the `down` snapshot into `now`.
///
/// Releases come first. Among presses, modifiers come before other keys so a chord
/// sampled in one go still reads as modifier-then-key.
pub fn key_transitions(down: &BTreeSet<String>, now: &BTreeSet<String>) -> Vec<OperatorEvent> {
    let mut events: Vec<OperatorEvent> = down
        .difference(now)
        .map(|key| OperatorEvent::Key {
            key: key.clone(),
            pressed: false,
        })
        .collect();
    let (modifiers, keys): (Vec<&String>, Vec<&String>) =
        now.difference(down).partition(|key| is_modifier(key));
    events.extend(modifiers.into_iter().chain(keys).map(|key| OperatorEvent::Key {
        key: key.clone(),
        pressed: true,
    }));
    events
}

/// Samples the X11 pointer through `xdotool getmouselocation`. Pointer only; key events
/// come from `KeyboardProbe`.
pub struct XdotoolPointerProbe {
    xdotool: XdotoolBackend,
}

impl XdotoolPointerProbe {
    pub fn new() -> Result<Self> {
        Ok(Self {
            xdotool: XdotoolBackend::new()?,
        })
    }
}

impl OperatorProbe for XdotoolPointerProbe {
    fn name(&self) -> &'static str {
        "xdotool-pointer"
    }

    fn poll(&mut self) -> Result<Vec<OperatorEvent>> {
        let (x, y) = self.xdotool.pointer_position()?;
        Ok(vec![OperatorEvent::PointerAt { x, y }])
    }
}

/// Replays queued batches of events, one batch per poll.
pub struct ScriptedProbe {
    queue: Arc<Mutex<VecDeque<Vec<OperatorEvent>>>>,
}

#[derive(Clone)]
pub struct ScriptedProbeHandle {
    queue: Arc<Mutex<VecDeque<Vec<OperatorEvent>>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn handle(&self) -> ScriptedProbeHandle {
        ScriptedProbeHandle {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProbeHandle {
    pub fn push(&self, batch: Vec<OperatorEvent>) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(batch);
    }
}

impl OperatorProbe for ScriptedProbe {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn reports_keys(&self) -> bool {
        true
    }

    fn poll(&mut self) -> Result<Vec<OperatorEvent>> {
        Ok(self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}
