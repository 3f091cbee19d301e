//! Emergency stop and operator override.
//!
//! The monitor is polled on its own thread, faster than the control loop ticks. Each poll
//! yields one verdict:
//! - `Stop`: stop marker file present, Ctrl-C received, or the emergency hotkey pressed
//! - `Yield`: the operator touched the mouse or keyboard; hand control back for a while
//! - `Clear`: nothing to do

#[cfg(feature = "operator-keys")]
mod keyboard;
mod probe;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::input::{InjectionLedger, Key, KeyCombo};

#[cfg(feature = "operator-keys")]
pub use keyboard::KeyboardProbe;
pub use probe::{
    key_transitions, OperatorEvent, OperatorProbe, ScriptedProbe, ScriptedProbeHandle,
    XdotoolPointerProbe,
};

pub const DEFAULT_POLL_HZ: u32 = 120;
pub const DEFAULT_YIELD_COOLDOWN_MS: u64 = 3_000;
pub const DEFAULT_POINTER_TOLERANCE_PX: i32 = 4;
pub const DEFAULT_HOTKEY: &str = "ctrl+q";

/// How long an injected key event stays claimable by the monitor.
const LEDGER_WINDOW: Duration = Duration::from_millis(750);
/// Superseded positions remembered while our latest move has not been observed.
const IN_FLIGHT_LIMIT: usize = 64;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    StopFile(PathBuf),
    Interrupt,
    Hotkey(String),
    InputFailures(u32),
    MaxCycles(u64),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StopFile(path) => write!(f, "stop file {} present", path.display()),
            StopReason::Interrupt => write!(f, "interrupted"),
            StopReason::Hotkey(combo) => write!(f, "emergency hotkey {}", combo),
            StopReason::InputFailures(n) => write!(f, "{} consecutive input failures", n),
            StopReason::MaxCycles(n) => write!(f, "reached {} cycles", n),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SafetyVerdict {
    Clear,
    Yield { cooldown: Duration },
    Stop(StopReason),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SafetyConfig {
    pub stop_file: Option<PathBuf>,
    pub poll_hz: u32,
    pub yield_cooldown_ms: u64,
    pub detect_operator_input: bool,
    pub hotkey: KeyCombo,
    pub pointer_tolerance_px: i32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            stop_file: None,
            poll_hz: DEFAULT_POLL_HZ,
            yield_cooldown_ms: DEFAULT_YIELD_COOLDOWN_MS,
            detect_operator_input: true,
            hotkey: KeyCombo {
                ctrl: true,
                alt: false,
                shift: false,
                key: "q".into(),
            },
            pointer_tolerance_px: DEFAULT_POINTER_TOLERANCE_PX,
        }
    }
}

#[derive(Debug, Default)]
struct Modifiers {
    ctrl: bool,
    alt: bool,
    shift: bool,
}

struct AttachedProbe {
    probe: Box<dyn OperatorProbe>,
    failing: bool,
}

pub struct SafetyMonitor {
    config: SafetyConfig,
    interrupt: Arc<AtomicBool>,
    probes: Vec<AttachedProbe>,
    ledger: Arc<InjectionLedger>,
    modifiers: Modifiers,
    /// Where the pointer should be if nobody but us moved it.
    expected_pointer: Option<(i32, i32)>,
    /// Earlier positions still valid until a poll sees `expected_pointer`. A reading can
    /// predate the move the ledger already reports.
    in_flight: Vec<(i32, i32)>,
    seen_move: u64,
}

impl SafetyMonitor {
    pub fn new(
        config: SafetyConfig,
        interrupt: Arc<AtomicBool>,
        ledger: Arc<InjectionLedger>,
    ) -> Self {
        Self {
            config,
            interrupt,
            probes: Vec::new(),
            ledger,
            modifiers: Modifiers::default(),
            expected_pointer: None,
            in_flight: Vec::new(),
            seen_move: 0,
        }
    }

    /// Attach another event source. Every poll reads all of them.
    pub fn with_probe(mut self, probe: Box<dyn OperatorProbe>) -> Self {
        log::debug!("operator probe attached: {}", probe.name());
        self.probes.push(AttachedProbe {
            probe,
            failing: false,
        });
        self
    }

    /// True when some probe reports key events, so the emergency hotkey can fire.
    pub fn watches_keys(&self) -> bool {
        self.probes.iter().any(|p| p.probe.reports_keys())
    }

    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.probe.name()).collect()
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.config.poll_hz.max(1) as u64)
    }

    /// Check every trigger once. Stop signals win over operator activity.
    pub fn poll_once(&mut self) -> SafetyVerdict {
        if self.interrupt.load(Ordering::SeqCst) {
            return SafetyVerdict::Stop(StopReason::Interrupt);
        }
        if let Some(path) = &self.config.stop_file {
            if path.exists() {
                return SafetyVerdict::Stop(StopReason::StopFile(path.clone()));
            }
        }

        let mut events = Vec::new();
        for attached in &mut self.probes {
            match attached.probe.poll() {
                Ok(batch) => {
                    attached.failing = false;
                    events.extend(batch);
                }
                Err(err) => {
                    if !attached.failing {
                        log::warn!("operator probe {} failed: {}", attached.probe.name(), err);
                        attached.failing = true;
                    }
                }
            }
        }

        let mut operator_active = false;
        for event in events {
            match event {
                OperatorEvent::Key { key, pressed } => {
                    if self.track_modifier(&key, pressed) {
                        continue;
                    }
                    if pressed && self.hotkey_matches(&key) {
                        return SafetyVerdict::Stop(StopReason::Hotkey(self.config.hotkey.to_string()));
                    }
                    let ours = Key::parse(&key)
                        .map(|k| self.ledger.claim_key(&k, pressed, LEDGER_WINDOW))
                        .unwrap_or(false);
                    if !ours {
                        operator_active = true;
                    }
                }
                OperatorEvent::PointerAt { x, y } => {
                    if self.pointer_moved_by_operator(x, y) {
                        operator_active = true;
                    }
                }
            }
        }

        if operator_active && self.config.detect_operator_input {
            SafetyVerdict::Yield {
                cooldown: Duration::from_millis(self.config.yield_cooldown_ms),
            }
        } else {
            SafetyVerdict::Clear
        }
    }

    /// Returns true when `key` is a modifier (and records its state).
    fn track_modifier(&mut self, key: &str, pressed: bool) -> bool {
        let lower = key.to_lowercase();
        let slot = match lower.as_str() {
            "ctrl" | "control" | "control_l" | "control_r" => &mut self.modifiers.ctrl,
            "alt" | "alt_l" | "alt_r" => &mut self.modifiers.alt,
            "shift" | "shift_l" | "shift_r" => &mut self.modifiers.shift,
            _ => return false,
        };
        *slot = pressed;
        true
    }

    fn hotkey_matches(&self, key: &str) -> bool {
        let combo = &self.config.hotkey;
        key.eq_ignore_ascii_case(&combo.key)
            && combo.ctrl == self.modifiers.ctrl
            && combo.alt == self.modifiers.alt
            && combo.shift == self.modifiers.shift
    }

    fn pointer_moved_by_operator(&mut self, x: i32, y: i32) -> bool {
        let moves = self.ledger.pointer_moves_since(self.seen_move);
        if let Some(last) = moves.last() {
            self.seen_move = last.seq;
        }
        let Some(mut expected) = self.expected_pointer else {
            // First reading is the baseline; moves logged so far may not have landed yet.
            for injected in moves {
                self.remember_in_flight((injected.x, injected.y));
            }
            self.expected_pointer = Some((x, y));
            return false;
        };
        for injected in moves {
            self.remember_in_flight(expected);
            expected = (injected.x, injected.y);
        }
        self.expected_pointer = Some(expected);

        if self.near((x, y), expected) {
            self.in_flight.clear();
            return false;
        }
        if self.in_flight.iter().any(|&p| self.near((x, y), p)) {
            return false;
        }
        self.expected_pointer = Some((x, y));
        self.in_flight.clear();
        true
    }

    fn remember_in_flight(&mut self, position: (i32, i32)) {
        if self.in_flight.len() == IN_FLIGHT_LIMIT {
            self.in_flight.remove(0);
        }
        self.in_flight.push(position);
    }

    fn near(&self, a: (i32, i32), b: (i32, i32)) -> bool {
        let tolerance = self.config.pointer_tolerance_px;
        (a.0 - b.0).abs() <= tolerance && (a.1 - b.1).abs() <= tolerance
    }
}
