//! Action to key translation with held-key bookkeeping.
//!
//! Invariants:
//! - keys no longer required are released before any new key is pressed
//! - any injection failure releases everything we think is held
//! - dropping the controller releases everything

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::decision::Action;
use crate::error::{PilotError, Result};
use crate::events::{self, PilotEvent};
use crate::geometry::Vec2;

use super::backend::InputBackend;
use super::keys::{Key, KeyBinds};
use super::ledger::InjectionLedger;

/// Axis component a direction needs before its key is pressed. Splits the circle into
/// eight sectors of equal width.
pub const AXIS_DEAD_ZONE: f32 = 0.38;
pub const DEFAULT_STALE_HOLD_TICKS: u32 = 3;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub binds: KeyBinds,
    /// Hold the attack key across cycles instead of pulsing it.
    pub continuous_attack: bool,
    /// Ticks without a fresh decision before movement keys are released.
    pub stale_hold_ticks: u32,
    pub max_consecutive_failures: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            binds: KeyBinds::default(),
            continuous_attack: false,
            stale_hold_ticks: DEFAULT_STALE_HOLD_TICKS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// What one action needs from the keyboard and mouse.
#[derive(Debug, Default, PartialEq)]
struct Plan {
    hold: BTreeSet<Key>,
    aim: Option<Vec2>,
    pulse: Option<Key>,
}

pub struct InputController {
    backend: Box<dyn InputBackend>,
    config: ControllerConfig,
    held: BTreeSet<Key>,
    consecutive_failures: u32,
    stale_ticks: u32,
    /// Screen position of frame pixel (0, 0).
    origin: (i32, i32),
    ledger: Arc<InjectionLedger>,
    halted: bool,
}

impl InputController {
    pub fn new(backend: Box<dyn InputBackend>, config: ControllerConfig) -> Self {
        Self {
            backend,
            config,
            held: BTreeSet::new(),
            consecutive_failures: 0,
            stale_ticks: 0,
            origin: (0, 0),
            ledger: Arc::new(InjectionLedger::new()),
            halted: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ledger(&self) -> Arc<InjectionLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn set_origin(&mut self, origin: (i32, i32)) {
        self.origin = origin;
    }

    pub fn held(&self) -> &BTreeSet<Key> {
        &self.held
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Bring the keyboard and mouse in line with `action`.
    ///
    /// Applying the same action twice leaves the held set unchanged.
    pub fn apply(&mut self, action: &Action) -> Result<()> {
        if self.halted {
            return Err(PilotError::SessionHalted {
                consecutive: self.consecutive_failures,
            });
        }
        self.stale_ticks = 0;
        let plan = self.plan(action);
        let outcome = self.execute(plan);
        self.settle(outcome)
    }

    /// Called on ticks without a fresh decision. Attack stops at once; movement keeps
    /// going for `stale_hold_ticks` ticks and then stops too.
    pub fn no_new_decision(&mut self) -> Result<()> {
        if self.halted {
            return Err(PilotError::SessionHalted {
                consecutive: self.consecutive_failures,
            });
        }
        self.stale_ticks = self.stale_ticks.saturating_add(1);
        let mut keep = self.held.clone();
        keep.remove(&self.config.binds.attack);
        if self.stale_ticks >= self.config.stale_hold_ticks {
            keep.clear();
        }
        let outcome = self.release_except(&keep);
        self.settle(outcome)
    }

    /// Release every held key. Keeps going past failures and returns the first error.
    /// Keys whose release failed stay in the held set so the next release retries them.
    pub fn release_all(&mut self) -> Result<()> {
        let mut first_err = None;
        let held = std::mem::take(&mut self.held);
        for key in held.into_iter().rev() {
            if let Err(err) = self.send(&key, false) {
                log::warn!("release of {} failed: {}", key, err);
                first_err.get_or_insert(err);
                self.held.insert(key);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn plan(&self, action: &Action) -> Plan {
        let binds = &self.config.binds;
        let mut plan = Plan::default();
        if let Some(direction) = action.movement() {
            plan.hold.extend(self.movement_keys(direction));
        }
        if let Some(target) = action.aim() {
            plan.aim = Some(target);
            if self.config.continuous_attack {
                plan.hold.insert(binds.attack.clone());
            } else {
                plan.pulse = Some(binds.attack.clone());
            }
        }
        if matches!(action, Action::Nexus) {
            plan.pulse = Some(binds.nexus.clone());
        }
        plan
    }

    /// Up to two movement keys for an image-space direction (y down).
    fn movement_keys(&self, direction: Vec2) -> Vec<Key> {
        let binds = &self.config.binds;
        let Some(dir) = direction.normalized() else {
            return Vec::new();
        };
        let mut keys = Vec::with_capacity(2);
        if dir.x > AXIS_DEAD_ZONE {
            keys.push(binds.move_right.clone());
        } else if dir.x < -AXIS_DEAD_ZONE {
            keys.push(binds.move_left.clone());
        }
        if dir.y > AXIS_DEAD_ZONE {
            keys.push(binds.move_down.clone());
        } else if dir.y < -AXIS_DEAD_ZONE {
            keys.push(binds.move_up.clone());
        }
        keys
    }

    fn execute(&mut self, plan: Plan) -> Result<()> {
        self.release_except(&plan.hold)?;

        if let Some(target) = plan.aim {
            let x = self.origin.0 + target.x.round() as i32;
            let y = self.origin.1 + target.y.round() as i32;
            // Recorded first so the safety monitor never sees our move before the ledger does.
            self.ledger.record_pointer(x, y);
            self.backend.move_pointer(x, y)?;
        }

        for key in &plan.hold {
            if !self.held.contains(key) {
                self.send(key, true)?;
                self.held.insert(key.clone());
            }
        }

        if let Some(key) = plan.pulse {
            if !self.held.contains(&key) {
                self.send(&key, true)?;
                self.held.insert(key.clone());
                self.send(&key, false)?;
                self.held.remove(&key);
            }
        }
        Ok(())
    }

    fn release_except(&mut self, keep: &BTreeSet<Key>) -> Result<()> {
        let stale: Vec<Key> = self.held.difference(keep).cloned().collect();
        for key in stale {
            self.send(&key, false)?;
            self.held.remove(&key);
        }
        Ok(())
    }

    fn send(&mut self, key: &Key, pressed: bool) -> Result<()> {
        self.ledger.record_key(key, pressed);
        match (key, pressed) {
            (Key::Keyboard(name), true) => self.backend.key_down(name),
            (Key::Keyboard(name), false) => self.backend.key_up(name),
            (Key::Mouse(button), true) => self.backend.button_down(*button),
            (Key::Mouse(button), false) => self.backend.button_up(*button),
        }
    }

    /// Failure bookkeeping shared by `apply` and `no_new_decision`.
    fn settle(&mut self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(err) => {
                if let Err(release_err) = self.release_all() {
                    log::warn!("release after failure also failed: {}", release_err);
                }
                self.consecutive_failures += 1;
                events::emit(PilotEvent::InputFault {
                    consecutive: self.consecutive_failures,
                    error: err.to_string(),
                });
                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    self.halted = true;
                    return Err(PilotError::SessionHalted {
                        consecutive: self.consecutive_failures,
                    });
                }
                Err(match err {
                    PilotError::InputInjectionFailed(msg) => PilotError::InputInjectionFailed(msg),
                    other => PilotError::InputInjectionFailed(other.to_string()),
                })
            }
        }
    }
}

impl Drop for InputController {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        if let Err(err) = self.release_all() {
            log::error!("keys may be stuck: release on drop failed: {}", err);
        }
    }
}
