//! State shared between the session threads.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::decision::Mode;
use crate::safety::{CancelToken, StopReason};
use crate::state::GameState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Running,
    /// Operator activity; no input until the cooldown passes.
    Yielding,
    /// Emergency stop or input failure escalation.
    Halted,
    /// Ended normally (cycle limit).
    Stopped,
}

impl SessionMode {
    fn to_u8(self) -> u8 {
        match self {
            SessionMode::Running => 0,
            SessionMode::Yielding => 1,
            SessionMode::Halted => 2,
            SessionMode::Stopped => 3,
        }
    }

    fn from_u8(raw: u8) -> SessionMode {
        match raw {
            0 => SessionMode::Running,
            1 => SessionMode::Yielding,
            2 => SessionMode::Halted,
            _ => SessionMode::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Running => "running",
            SessionMode::Yielding => "yielding",
            SessionMode::Halted => "halted",
            SessionMode::Stopped => "stopped",
        }
    }
}

/// What readers see of the session. Replaced wholesale once per cycle.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub cycle: u64,
    pub mode: Mode,
    pub status: SessionMode,
    pub hp: Option<f32>,
    pub action: Option<String>,
    pub enemies: usize,
    pub projectiles: usize,
    pub frame_seq: Option<u64>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            cycle: 0,
            mode: Mode::Idle,
            status: SessionMode::Running,
            hp: None,
            action: None,
            enemies: 0,
            projectiles: 0,
            frame_seq: None,
        }
    }
}

pub struct SessionShared {
    cancel: CancelToken,
    mode: AtomicU8,
    status: AtomicU8,
    cycles: AtomicU64,
    captures: AtomicU64,
    capture_failures: AtomicU64,
    input_faults: AtomicU64,
    yield_until: Mutex<Option<Instant>>,
    stop_reason: Mutex<Option<StopReason>>,
    snapshot: Mutex<Arc<SessionSnapshot>>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            mode: AtomicU8::new(Mode::Idle.to_u8()),
            status: AtomicU8::new(SessionMode::Running.to_u8()),
            cycles: AtomicU64::new(0),
            captures: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            input_faults: AtomicU64::new(0),
            yield_until: Mutex::new(None),
            stop_reason: Mutex::new(None),
            snapshot: Mutex::new(Arc::new(SessionSnapshot::default())),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::SeqCst)).unwrap_or(Mode::Idle)
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn status(&self) -> SessionMode {
        SessionMode::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: SessionMode) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn capture_failures(&self) -> u64 {
        self.capture_failures.load(Ordering::Relaxed)
    }

    pub fn input_faults(&self) -> u64 {
        self.input_faults.load(Ordering::Relaxed)
    }

    pub(crate) fn record_capture(&self, ok: bool) {
        if ok {
            self.captures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.capture_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_input_fault(&self) {
        self.input_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop the session. The first reason wins; later calls only re-assert cancellation.
    pub fn request_stop(&self, reason: StopReason) {
        let status = match reason {
            StopReason::MaxCycles(_) => SessionMode::Stopped,
            _ => SessionMode::Halted,
        };
        let mut slot = self
            .stop_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
            self.set_status(status);
        }
        self.cancel.cancel();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn yield_for(&self, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        let mut slot = self
            .yield_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(slot.map_or(until, |current| current.max(until)));
    }

    /// True while a yield cooldown is running. Clears the deadline once it has passed.
    pub fn is_yielding(&self, now: Instant) -> bool {
        let mut slot = self
            .yield_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *slot {
            Some(until) if now < until => true,
            Some(_) => {
                *slot = None;
                false
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        let fresh = Arc::new(snapshot);
        *self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// LatestState
// ----------------------------------------------------------------------------

/// A perceived state plus where its frame sits on screen.
#[derive(Clone, Debug)]
pub struct Observation {
    pub state: GameState,
    pub origin: (i32, i32),
}

/// Single-slot handoff from perception to control. A newer observation overwrites an
/// unconsumed older one.
#[derive(Default)]
pub struct LatestState {
    slot: Mutex<(u64, Option<Arc<Observation>>)>,
}

impl LatestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `observation` and return its generation.
    pub fn publish(&self, observation: Observation) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.0 += 1;
        slot.1 = Some(Arc::new(observation));
        slot.0
    }

    /// The current observation if its generation is newer than `seen`.
    pub fn newer_than(&self, seen: u64) -> Option<(u64, Arc<Observation>)> {
        let slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match &slot.1 {
            Some(observation) if slot.0 > seen => Some((slot.0, Arc::clone(observation))),
            _ => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> Observation {
        Observation {
            state: GameState::initial(),
            origin: (0, 0),
        }
    }

    #[test]
    fn latest_state_overwrites_and_reports_generations() {
        let latest = LatestState::new();
        assert!(latest.newer_than(0).is_none());
        latest.publish(observation());
        let second = latest.publish(observation());
        assert_eq!(second, 2);
        let (generation, _) = latest.newer_than(0).unwrap();
        assert_eq!(generation, 2);
        assert!(latest.newer_than(2).is_none());
    }

    #[test]
    fn first_stop_reason_wins() {
        let shared = SessionShared::new();
        shared.request_stop(StopReason::MaxCycles(10));
        shared.request_stop(StopReason::Interrupt);
        assert_eq!(shared.stop_reason(), Some(StopReason::MaxCycles(10)));
        assert_eq!(shared.status(), SessionMode::Stopped);
        assert!(shared.cancel_token().is_cancelled());
    }

    #[test]
    fn yield_expires() {
        let shared = SessionShared::new();
        let now = Instant::now();
        shared.yield_for(Duration::from_millis(200));
        assert!(shared.is_yielding(now));
        assert!(!shared.is_yielding(now + Duration::from_millis(500)));
        assert!(!shared.is_yielding(now));
    }

    #[test]
    fn snapshots_are_swapped_not_mutated() {
        let shared = SessionShared::new();
        let before = shared.snapshot();
        shared.publish(SessionSnapshot {
            cycle: 4,
            ..SessionSnapshot::default()
        });
        assert_eq!(before.cycle, 0);
        assert_eq!(shared.snapshot().cycle, 4);
    }
}
