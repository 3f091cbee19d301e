//! Global keyboard sampling through `device_query`.
//!
//! `DeviceState` polls the X11 keymap, so it needs a display but no focus. It lives on
//! its own sampler thread; the probe only drains the transitions that thread queues up.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use device_query::{DeviceQuery, DeviceState, Keycode};

use super::probe::{key_transitions, OperatorEvent, OperatorProbe};
use crate::error::{PilotError, Result};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(4);

pub struct KeyboardProbe {
    events: Receiver<OperatorEvent>,
    closed: Arc<AtomicBool>,
}

impl KeyboardProbe {
    pub fn new() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (events_tx, events) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let sampler_closed = Arc::clone(&closed);
        thread::Builder::new()
            .name("pilot-keyboard".into())
            .spawn(move || {
                let Some(device) = DeviceState::checked_new() else {
                    let _ = ready_tx.send(false);
                    return;
                };
                let _ = ready_tx.send(true);
                sample(&device, &events_tx, &sampler_closed);
            })?;
        match ready_rx.recv() {
            Ok(true) => Ok(Self { events, closed }),
            _ => Err(PilotError::Config(
                "keyboard sampling needs an X display".into(),
            )),
        }
    }
}

impl Drop for KeyboardProbe {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl OperatorProbe for KeyboardProbe {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    fn reports_keys(&self) -> bool {
        true
    }

    fn poll(&mut self) -> Result<Vec<OperatorEvent>> {
        let mut batch = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => batch.push(event),
                Err(TryRecvError::Empty) => return Ok(batch),
                Err(TryRecvError::Disconnected) => {
                    return Err(PilotError::Io(std::io::Error::other(
                        "keyboard sampler stopped",
                    )))
                }
            }
        }
    }
}

fn sample(device: &DeviceState, events: &Sender<OperatorEvent>, closed: &AtomicBool) {
    let mut down = BTreeSet::new();
    while !closed.load(Ordering::SeqCst) {
        let now: BTreeSet<String> = device.get_keys().iter().map(key_name).collect();
        for event in key_transitions(&down, &now) {
            if events.send(event).is_err() {
                return;
            }
        }
        down = now;
        thread::sleep(SAMPLE_INTERVAL);
    }
}

/// Keybind-style name for a keycode: `q`, `1`, `space`, `control_l`.
fn key_name(code: &Keycode) -> String {
    let debug = format!("{:?}", code);
    match debug.as_str() {
        "LControl" => "control_l".into(),
        "RControl" => "control_r".into(),
        "LShift" => "shift_l".into(),
        "RShift" => "shift_r".into(),
        "LAlt" => "alt_l".into(),
        "RAlt" => "alt_r".into(),
        other => match other.strip_prefix("Key") {
            Some(digit) if digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit()) => {
                digit.to_string()
            }
            _ => other.to_lowercase(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycodes_map_to_keybind_names() {
        assert_eq!(key_name(&Keycode::Q), "q");
        assert_eq!(key_name(&Keycode::Key1), "1");
        assert_eq!(key_name(&Keycode::LControl), "control_l");
        assert_eq!(key_name(&Keycode::Space), "space");
        assert_eq!(key_name(&Keycode::F5), "f5");
    }
}
