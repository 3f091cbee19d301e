//! Bot session: the threads of the perception-action loop.
//!
//! - perception worker: capture → detect → estimate at the tick rate, publishing into a
//!   single-slot `LatestState`
//! - safety thread: polls the `SafetyMonitor` and applies its verdicts
//! - control loop (caller's thread): decide and apply on fresh states, otherwise
//!   `no_new_decision()`
//!
//! `step()` runs the same three stages inline on the caller's thread, one cycle per call.

mod perception;
mod shared;

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capture::{self, CaptureBackoff, FrameSource};
use crate::config::{InputBackendKind, PilotConfig};
use crate::decision::{Action, DecisionEngine, Mode};
use crate::detect::{Detector, TemplateLibrary};
use crate::error::{PilotError, Result};
use crate::events::{self, PilotEvent};
use crate::input::{InputBackend, InputController, Key, RecordingBackend, XdotoolBackend};
use crate::safety::{SafetyMonitor, SafetyVerdict, StopReason, XdotoolPointerProbe};
use crate::state::StateEstimator;

pub use perception::{Perceived, Perception};
pub use shared::{LatestState, Observation, SessionMode, SessionShared, SessionSnapshot};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a session is assembled from.
pub struct SessionParts {
    pub source: Box<dyn FrameSource>,
    pub library: Arc<TemplateLibrary>,
    pub detector: Detector,
    pub estimator: StateEstimator,
    pub backoff: CaptureBackoff,
    pub engine: DecisionEngine,
    pub controller: InputController,
    pub safety: SafetyMonitor,
    pub tick: Duration,
    pub max_cycles: Option<u64>,
}

/// What one control tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum Tick {
    Acted(Action),
    /// No fresh state; held keys decay.
    Stale,
    /// Operator override in effect; nothing injected.
    Yielding,
    Stopped(StopReason),
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub cycles: u64,
    pub status: SessionMode,
    pub mode: Mode,
    pub stop_reason: Option<StopReason>,
    pub captures: u64,
    pub capture_failures: u64,
    pub input_faults: u64,
}

pub struct BotSession {
    perception: Perception,
    safety: SafetyMonitor,
    control: Control,
    tick: Duration,
}

impl BotSession {
    pub fn new(parts: SessionParts) -> Self {
        let shared = Arc::new(SessionShared::new());
        let control = Control {
            engine: parts.engine,
            controller: Arc::new(Mutex::new(parts.controller)),
            shared,
            latest: Arc::new(LatestState::new()),
            seen_generation: 0,
            max_cycles: parts.max_cycles,
        };
        Self {
            perception: Perception::new(
                parts.source,
                parts.detector,
                parts.library,
                parts.estimator,
                parts.backoff,
            ),
            safety: parts.safety,
            control,
            tick: parts.tick,
        }
    }

    /// Build a session from validated configuration. `interrupt` is the Ctrl-C flag.
    pub fn from_config(config: &PilotConfig, interrupt: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let source = capture::open_source(&config.capture.source, config.capture.window_title.as_deref())?;
        let library = match &config.templates.root {
            Some(root) => TemplateLibrary::load(root)?,
            None => {
                log::warn!("no template library configured; only the health bar is observed");
                TemplateLibrary::default()
            }
        };

        let backend: Box<dyn InputBackend> = match config.input_backend {
            InputBackendKind::DryRun => Box::new(RecordingBackend::new()),
            InputBackendKind::Xdotool => {
                let xdotool = XdotoolBackend::new()?;
                if let Some(title) = &config.capture.window_title {
                    focus_game_window(&xdotool, title);
                }
                Box::new(xdotool)
            }
        };
        let controller = InputController::new(backend, config.controller_config());
        log::info!("input backend: {}", controller.backend_name());

        let mut safety = with_keyboard(SafetyMonitor::new(
            config.safety.clone(),
            interrupt,
            controller.ledger(),
        ));
        if config.input_backend == InputBackendKind::Xdotool && config.safety.detect_operator_input {
            match XdotoolPointerProbe::new() {
                Ok(probe) => safety = safety.with_probe(Box::new(probe)),
                Err(err) => log::warn!("operator pointer detection disabled: {}", err),
            }
        }
        if !safety.watches_keys() {
            log::warn!(
                "emergency hotkey {} is not armed: no keyboard source (build with feature operator-keys); use Ctrl-C or the stop file",
                config.safety.hotkey
            );
        }

        Ok(Self::new(SessionParts {
            source,
            library: Arc::new(library),
            detector: Detector::new(config.detector_config()),
            estimator: StateEstimator::new(config.estimator_config()),
            backoff: CaptureBackoff::new(config.capture.initial_backoff, config.capture.max_backoff),
            engine: DecisionEngine::new(config.decision_config()),
            controller,
            safety,
            tick: config.tick_interval(),
            max_cycles: config.max_cycles,
        }))
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.control.shared)
    }

    pub fn controller(&self) -> Arc<Mutex<InputController>> {
        Arc::clone(&self.control.controller)
    }

    pub fn held_keys(&self) -> BTreeSet<Key> {
        lock(&self.control.controller).held().clone()
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.control.engine
    }

    /// Whether the emergency hotkey can fire: some attached probe reports key events.
    pub fn hotkey_armed(&self) -> bool {
        self.safety.watches_keys()
    }

    /// One complete cycle on the caller's thread: safety poll, perceive, decide, act.
    pub fn step(&mut self) -> Result<Tick> {
        let verdict = self.safety.poll_once();
        apply_verdict(&self.control.shared, &self.control.controller, verdict);
        if let Some(reason) = self.control.shared.stop_reason() {
            return Ok(Tick::Stopped(reason));
        }

        match self.perception.perceive(self.control.shared.cancel_token()) {
            Ok(perceived) => {
                if let Some(ok) = perceived.captured {
                    self.control.shared.record_capture(ok);
                }
                self.control.latest.publish(perceived.observation);
            }
            Err(PilotError::Cancelled) => {}
            Err(err) => return Err(err),
        }
        self.control.tick(Instant::now())
    }

    /// Run until stopped. Perception and safety get their own threads; the control loop
    /// runs here. Every key is released before this returns.
    pub fn run(self) -> Result<SessionReport> {
        let BotSession {
            perception,
            safety,
            mut control,
            tick,
        } = self;
        let shared = Arc::clone(&control.shared);

        let perception_thread = {
            let shared = Arc::clone(&shared);
            let latest = Arc::clone(&control.latest);
            thread::Builder::new()
                .name("pilot-perception".into())
                .spawn(move || perception_loop(perception, &shared, &latest, tick))?
        };
        let safety_thread = {
            let shared = Arc::clone(&shared);
            let controller = Arc::clone(&control.controller);
            thread::Builder::new()
                .name("pilot-safety".into())
                .spawn(move || safety_loop(safety, &shared, &controller))
        };
        let safety_thread = match safety_thread {
            Ok(handle) => handle,
            Err(err) => {
                shared.cancel_token().cancel();
                let _ = perception_thread.join();
                control.teardown();
                return Err(err.into());
            }
        };

        log::info!("session running at {} ms per tick", tick.as_millis());
        let result = control_loop(&mut control, tick);

        shared.cancel_token().cancel();
        if perception_thread.join().is_err() {
            log::error!("perception thread panicked");
        }
        if safety_thread.join().is_err() {
            log::error!("safety thread panicked");
        }
        let report = control.teardown();
        result.map(|_| report)
    }

    /// Release everything and summarize. For sessions driven with `step()`.
    pub fn finish(mut self) -> SessionReport {
        self.control.teardown()
    }
}

#[cfg(feature = "operator-keys")]
fn with_keyboard(safety: SafetyMonitor) -> SafetyMonitor {
    match crate::safety::KeyboardProbe::new() {
        Ok(probe) => safety.with_probe(Box::new(probe)),
        Err(err) => {
            log::warn!("keyboard probe unavailable: {}", err);
            safety
        }
    }
}

#[cfg(not(feature = "operator-keys"))]
fn with_keyboard(safety: SafetyMonitor) -> SafetyMonitor {
    safety
}

fn focus_game_window(xdotool: &XdotoolBackend, title: &str) {
    match xdotool.search_window(title) {
        Ok(Some(id)) => {
            if let Err(err) = xdotool.activate_window(&id) {
                log::warn!("could not activate window '{}': {}", title, err);
            }
        }
        Ok(None) => log::warn!("no window titled '{}' to focus", title),
        Err(err) => log::warn!("window search failed: {}", err),
    }
}

fn lock(controller: &Mutex<InputController>) -> MutexGuard<'_, InputController> {
    controller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn release_all(controller: &Mutex<InputController>) {
    if let Err(err) = lock(controller).release_all() {
        log::error!("release-all failed: {}", err);
    }
}

fn apply_verdict(shared: &SessionShared, controller: &Mutex<InputController>, verdict: SafetyVerdict) {
    match verdict {
        SafetyVerdict::Clear => {}
        SafetyVerdict::Yield { cooldown } => {
            if !shared.is_yielding(Instant::now()) {
                events::emit(PilotEvent::OperatorYield {
                    cooldown_ms: cooldown.as_millis() as u64,
                });
            }
            shared.yield_for(cooldown);
            release_all(controller);
        }
        SafetyVerdict::Stop(reason) => {
            if shared.stop_reason().is_none() {
                events::emit(PilotEvent::EmergencyStop {
                    reason: reason.to_string(),
                });
            }
            shared.request_stop(reason);
            release_all(controller);
        }
    }
}

fn sleep_rest_of(started: Instant, period: Duration) {
    if let Some(rest) = period.checked_sub(started.elapsed()) {
        thread::sleep(rest);
    }
}

fn perception_loop(
    mut perception: Perception,
    shared: &SessionShared,
    latest: &LatestState,
    tick: Duration,
) {
    let cancel = shared.cancel_token().clone();
    while !cancel.is_cancelled() {
        let started = Instant::now();
        match perception.perceive(&cancel) {
            Ok(perceived) => {
                if let Some(ok) = perceived.captured {
                    shared.record_capture(ok);
                }
                latest.publish(perceived.observation);
            }
            Err(PilotError::Cancelled) => break,
            Err(err) => log::warn!("perception cycle failed: {}", err),
        }
        sleep_rest_of(started, tick);
    }
    log::debug!("perception thread exiting");
}

fn safety_loop(mut monitor: SafetyMonitor, shared: &SessionShared, controller: &Mutex<InputController>) {
    let interval = monitor.poll_interval();
    let cancel = shared.cancel_token().clone();
    while !cancel.is_cancelled() {
        let started = Instant::now();
        let verdict = monitor.poll_once();
        apply_verdict(shared, controller, verdict);
        sleep_rest_of(started, interval);
    }
    log::debug!("safety thread exiting");
}

fn control_loop(control: &mut Control, tick: Duration) -> Result<()> {
    let mut last_health_log = Instant::now();
    loop {
        let started = Instant::now();
        if let Tick::Stopped(reason) = control.tick(started)? {
            log::info!("session stopping: {}", reason);
            return Ok(());
        }
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let shared = &control.shared;
            log::info!(
                "health: cycles={} mode={} status={} captures={} capture_failures={} input_faults={}",
                shared.cycles(),
                shared.mode(),
                shared.status().as_str(),
                shared.captures(),
                shared.capture_failures(),
                shared.input_faults()
            );
            last_health_log = Instant::now();
        }
        sleep_rest_of(started, tick);
    }
}

// ----------------------------------------------------------------------------
// Control
// ----------------------------------------------------------------------------

struct Control {
    engine: DecisionEngine,
    controller: Arc<Mutex<InputController>>,
    shared: Arc<SessionShared>,
    latest: Arc<LatestState>,
    seen_generation: u64,
    max_cycles: Option<u64>,
}

impl Control {
    fn tick(&mut self, now: Instant) -> Result<Tick> {
        if let Some(reason) = self.shared.stop_reason() {
            return Ok(Tick::Stopped(reason));
        }
        let cycle = self.shared.next_cycle();

        let outcome = if self.shared.is_yielding(now) {
            self.shared.set_status(SessionMode::Yielding);
            release_all(&self.controller);
            self.publish(cycle, None, None);
            Tick::Yielding
        } else {
            if self.shared.status() == SessionMode::Yielding {
                self.shared.set_status(SessionMode::Running);
                log::info!("operator yield over; resuming");
            }
            match self.latest.newer_than(self.seen_generation) {
                Some((generation, observation)) => {
                    self.seen_generation = generation;
                    let action = self.decide(cycle, &observation);
                    let result = {
                        let mut controller = lock(&self.controller);
                        // Safety may have released everything while we were deciding.
                        if self.interrupted() {
                            None
                        } else {
                            controller.set_origin(observation.origin);
                            Some(controller.apply(&action))
                        }
                    };
                    match result {
                        Some(result) => {
                            self.settle_input(result)?;
                            self.publish(cycle, Some(&observation), Some(&action));
                            Tick::Acted(action)
                        }
                        None => self.preempted(cycle),
                    }
                }
                None => {
                    let result = {
                        let mut controller = lock(&self.controller);
                        if self.interrupted() {
                            None
                        } else {
                            Some(controller.no_new_decision())
                        }
                    };
                    match result {
                        Some(result) => {
                            self.settle_input(result)?;
                            Tick::Stale
                        }
                        None => self.preempted(cycle),
                    }
                }
            }
        };

        if let Some(max) = self.max_cycles {
            if cycle >= max {
                self.shared.request_stop(StopReason::MaxCycles(max));
            }
        }
        Ok(outcome)
    }

    /// Checked under the controller lock, after the safety thread's release-all.
    fn interrupted(&self) -> bool {
        self.shared.is_stopping() || self.shared.is_yielding(Instant::now())
    }

    fn preempted(&self, cycle: u64) -> Tick {
        if let Some(reason) = self.shared.stop_reason() {
            return Tick::Stopped(reason);
        }
        if self.shared.is_stopping() {
            return Tick::Stale;
        }
        self.shared.set_status(SessionMode::Yielding);
        self.publish(cycle, None, None);
        Tick::Yielding
    }

    fn decide(&mut self, cycle: u64, observation: &Observation) -> Action {
        let state = &observation.state;
        let before = self.engine.mode();
        let action = self.engine.decide(state);
        let after = self.engine.mode();
        if before != after {
            events::emit(PilotEvent::ModeTransition {
                cycle,
                from: before.to_string(),
                to: after.to_string(),
            });
            if after == Mode::Nexusing {
                events::emit(PilotEvent::NexusTriggered {
                    cycle,
                    hp: state.hp.percent(),
                    reason: self
                        .engine
                        .nexus_cause()
                        .map(|cause| cause.to_string())
                        .unwrap_or_default(),
                });
            }
        }
        self.shared.set_mode(after);
        events::emit(PilotEvent::CycleDecision {
            cycle,
            mode: after.to_string(),
            action: action.to_string(),
            hp: state.hp.percent(),
            enemies: state.enemies.len(),
            projectiles: state.projectiles.len(),
            hazards: state.hazards.len(),
        });
        action
    }

    /// Injection faults are survivable; a halt from the controller stops the session.
    fn settle_input(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(PilotError::InputInjectionFailed(_)) => {
                self.shared.record_input_fault();
                Ok(())
            }
            Err(PilotError::SessionHalted { consecutive }) => {
                self.shared.record_input_fault();
                self.shared.request_stop(StopReason::InputFailures(consecutive));
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    fn publish(&self, cycle: u64, observation: Option<&Observation>, action: Option<&Action>) {
        let state = observation.map(|o| &o.state);
        self.shared.publish(SessionSnapshot {
            cycle,
            mode: self.engine.mode(),
            status: self.shared.status(),
            hp: state.and_then(|s| s.hp.percent()),
            action: action.map(|a| a.to_string()),
            enemies: state.map_or(0, |s| s.enemies.len()),
            projectiles: state.map_or(0, |s| s.projectiles.len()),
            frame_seq: state.and_then(|s| s.frame.map(|f| f.seq)),
        });
    }

    fn teardown(&mut self) -> SessionReport {
        release_all(&self.controller);
        let reason = self.shared.stop_reason();
        if reason.is_none() {
            self.shared.set_status(SessionMode::Stopped);
        }
        let status = self.shared.status();
        let cycles = self.shared.cycles();
        if status == SessionMode::Halted {
            events::emit(PilotEvent::SessionHalted {
                reason: reason
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
                cycles,
            });
        }
        SessionReport {
            cycles,
            status,
            mode: self.engine.mode(),
            stop_reason: reason,
            captures: self.shared.captures(),
            capture_failures: self.shared.capture_failures(),
            input_faults: self.shared.input_faults(),
        }
    }
}
