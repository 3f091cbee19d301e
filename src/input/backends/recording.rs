//! Dry-run backend.
//!
//! Records every injected event instead of touching the desktop. The event log is
//! shared through a `RecordingHandle`, so tests (and `pilotd --dry-run`) can inspect
//! it after the backend has been moved into the controller.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{PilotError, Result};
use crate::input::backend::InputBackend;
use crate::input::keys::{Key, MouseButton};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(String),
    KeyUp(String),
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    MovePointer(i32, i32),
}

#[derive(Debug, Default)]
struct Recording {
    events: Vec<InputEvent>,
    pointer: (i32, i32),
    fail_remaining: u32,
}

pub struct RecordingBackend {
    shared: Arc<Mutex<Recording>>,
}

/// Read side of a `RecordingBackend`.
#[derive(Clone)]
pub struct RecordingHandle {
    shared: Arc<Mutex<Recording>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Recording::default())),
        }
    }

    pub fn handle(&self) -> RecordingHandle {
        RecordingHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn record(&mut self, event: InputEvent) -> Result<()> {
        let mut rec = lock(&self.shared);
        if rec.fail_remaining > 0 {
            rec.fail_remaining -= 1;
            return Err(PilotError::InputInjectionFailed(format!(
                "injected failure for {:?}",
                event
            )));
        }
        if let InputEvent::MovePointer(x, y) = event {
            rec.pointer = (x, y);
        }
        rec.events.push(event);
        Ok(())
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.record(InputEvent::KeyDown(key.to_string()))
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.record(InputEvent::KeyUp(key.to_string()))
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        self.record(InputEvent::ButtonDown(button))
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        self.record(InputEvent::ButtonUp(button))
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        self.record(InputEvent::MovePointer(x, y))
    }

    fn pointer_position(&mut self) -> Result<(i32, i32)> {
        Ok(lock(&self.shared).pointer)
    }
}

impl RecordingHandle {
    pub fn events(&self) -> Vec<InputEvent> {
        lock(&self.shared).events.clone()
    }

    pub fn clear(&self) {
        lock(&self.shared).events.clear();
    }

    /// Make the next `n` injections fail.
    pub fn fail_next(&self, n: u32) {
        lock(&self.shared).fail_remaining = n;
    }

    /// Keys and buttons that are down according to the recorded log.
    pub fn held(&self) -> BTreeSet<Key> {
        let mut held = BTreeSet::new();
        for event in lock(&self.shared).events.iter() {
            match event {
                InputEvent::KeyDown(k) => {
                    held.insert(Key::Keyboard(k.clone()));
                }
                InputEvent::KeyUp(k) => {
                    held.remove(&Key::Keyboard(k.clone()));
                }
                InputEvent::ButtonDown(b) => {
                    held.insert(Key::Mouse(*b));
                }
                InputEvent::ButtonUp(b) => {
                    held.remove(&Key::Mouse(*b));
                }
                InputEvent::MovePointer(..) => {}
            }
        }
        held
    }

    pub fn pointer(&self) -> (i32, i32) {
        lock(&self.shared).pointer
    }
}

fn lock(shared: &Mutex<Recording>) -> MutexGuard<'_, Recording> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
