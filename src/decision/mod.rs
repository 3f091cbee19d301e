//! Decision state machine.
//!
//! Rules, first match wins:
//!
//! 1. Nexus (always first): health known and below the threshold, or health unknown for
//!    longer than `unknown_hp_limit` cycles while fighting. Terminal until `reset()`.
//! 2. The configurable non-terminal rules, in `priority` order:
//!    - `Flee`: a projectile inside the danger radius.
//!    - `Engage`: nearest enemy inside engagement range, kite or circle strafe.
//!    - `Combat`: enemies visible but out of range, stand and shoot the nearest.
//! 3. Idle.

mod steering;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Vec2;
use crate::state::{GameState, Hp, Observed};

pub use steering::{away_from_nearest_edge, flee_direction, strafe_sign};

pub const DEFAULT_NEXUS_PERCENT: f32 = 30.0;
pub const DEFAULT_UNKNOWN_HP_LIMIT: u32 = 15;
pub const DEFAULT_DANGER_RADIUS_PX: f32 = 100.0;
pub const DEFAULT_ENGAGEMENT_RANGE_PX: f32 = 250.0;
pub const DEFAULT_STRAFE_LOOKAHEAD_PX: f32 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Combat,
    Kiting,
    CircleStrafing,
    Fleeing,
    Nexusing,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Combat => "combat",
            Mode::Kiting => "kiting",
            Mode::CircleStrafing => "circle_strafing",
            Mode::Fleeing => "fleeing",
            Mode::Nexusing => "nexusing",
        }
    }

    /// Modes in which losing sight of the health bar is dangerous.
    pub fn is_aggressive(self) -> bool {
        matches!(self, Mode::Combat | Mode::Kiting | Mode::CircleStrafing)
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Mode::Idle => 0,
            Mode::Combat => 1,
            Mode::Kiting => 2,
            Mode::CircleStrafing => 3,
            Mode::Fleeing => 4,
            Mode::Nexusing => 5,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Mode> {
        Some(match raw {
            0 => Mode::Idle,
            1 => Mode::Combat,
            2 => Mode::Kiting,
            3 => Mode::CircleStrafing,
            4 => Mode::Fleeing,
            5 => Mode::Nexusing,
            _ => return None,
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementMode {
    #[default]
    Kiting,
    CircleStrafe,
}

impl std::str::FromStr for MovementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "kiting" | "kite" => Ok(MovementMode::Kiting),
            "circle_strafe" | "circle_strafing" | "circle" => Ok(MovementMode::CircleStrafe),
            other => Err(format!("unknown movement mode '{}'", other)),
        }
    }
}

/// Non-terminal rules whose order is configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Flee,
    Engage,
    Combat,
}

pub const DEFAULT_PRIORITY: [Rule; 3] = [Rule::Flee, Rule::Engage, Rule::Combat];

/// One cycle's command. Directions are unit vectors; targets are image-space points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Idle,
    MoveTo { direction: Vec2 },
    Attack { target: Vec2 },
    Kite { direction: Vec2, target: Vec2 },
    CircleStrafe { direction: Vec2, target: Vec2, rotation: i8 },
    Nexus,
}

impl Action {
    pub fn movement(&self) -> Option<Vec2> {
        match *self {
            Action::MoveTo { direction }
            | Action::Kite { direction, .. }
            | Action::CircleStrafe { direction, .. } => Some(direction),
            Action::Idle | Action::Attack { .. } | Action::Nexus => None,
        }
    }

    /// Point to aim at, for actions that attack.
    pub fn aim(&self) -> Option<Vec2> {
        match *self {
            Action::Attack { target }
            | Action::Kite { target, .. }
            | Action::CircleStrafe { target, .. } => Some(target),
            Action::Idle | Action::MoveTo { .. } | Action::Nexus => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Idle => "idle",
            Action::MoveTo { .. } => "move_to",
            Action::Attack { .. } => "attack",
            Action::Kite { .. } => "kite",
            Action::CircleStrafe { .. } => "circle_strafe",
            Action::Nexus => "nexus",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Idle => write!(f, "idle"),
            Action::MoveTo { direction: d } => write!(f, "move_to({:.2},{:.2})", d.x, d.y),
            Action::Attack { target: t } => write!(f, "attack@({:.0},{:.0})", t.x, t.y),
            Action::Kite {
                direction: d,
                target: t,
            } => write!(
                f,
                "kite({:.2},{:.2})@({:.0},{:.0})",
                d.x, d.y, t.x, t.y
            ),
            Action::CircleStrafe {
                direction: d,
                target: t,
                rotation,
            } => write!(
                f,
                "circle_strafe({:.2},{:.2},{:+})@({:.0},{:.0})",
                d.x, d.y, rotation, t.x, t.y
            ),
            Action::Nexus => write!(f, "nexus"),
        }
    }
}

/// Why the engine entered `Nexusing`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NexusCause {
    LowHp { percent: f32, threshold: f32 },
    HpUnknown { cycles: u32 },
}

impl fmt::Display for NexusCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NexusCause::LowHp { percent, threshold } => {
                write!(f, "hp {:.1}% below {:.1}%", percent, threshold)
            }
            NexusCause::HpUnknown { cycles } => {
                write!(f, "hp unreadable for {} cycles while fighting", cycles)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionConfig {
    pub auto_nexus_threshold_percent: f32,
    pub unknown_hp_limit: u32,
    pub movement_mode: MovementMode,
    pub danger_radius_px: f32,
    pub engagement_range_px: f32,
    pub priority: [Rule; 3],
    /// Hazards inside the danger radius trigger fleeing like projectiles.
    pub flee_hazards: bool,
    pub strafe_lookahead_px: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            auto_nexus_threshold_percent: DEFAULT_NEXUS_PERCENT,
            unknown_hp_limit: DEFAULT_UNKNOWN_HP_LIMIT,
            movement_mode: MovementMode::Kiting,
            danger_radius_px: DEFAULT_DANGER_RADIUS_PX,
            engagement_range_px: DEFAULT_ENGAGEMENT_RANGE_PX,
            priority: DEFAULT_PRIORITY,
            flee_hazards: true,
            strafe_lookahead_px: DEFAULT_STRAFE_LOOKAHEAD_PX,
        }
    }
}

pub struct DecisionEngine {
    config: DecisionConfig,
    mode: Mode,
    strafe_sign: i8,
    nexus_cause: Option<NexusCause>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            mode: Mode::Idle,
            strafe_sign: 1,
            nexus_cause: None,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn nexus_cause(&self) -> Option<NexusCause> {
        self.nexus_cause
    }

    /// Leave `Nexusing` and start over from `Idle`.
    pub fn reset(&mut self) {
        self.mode = Mode::Idle;
        self.strafe_sign = 1;
        self.nexus_cause = None;
    }

    pub fn decide(&mut self, state: &GameState) -> Action {
        if self.mode == Mode::Nexusing {
            return Action::Nexus;
        }
        if let Some(cause) = self.nexus_check(state) {
            self.mode = Mode::Nexusing;
            self.nexus_cause = Some(cause);
            return Action::Nexus;
        }
        for rule in self.config.priority {
            let decided = match rule {
                Rule::Flee => self.flee(state),
                Rule::Engage => self.engage(state),
                Rule::Combat => self.combat(state),
            };
            if let Some((mode, action)) = decided {
                self.mode = mode;
                return action;
            }
        }
        self.mode = Mode::Idle;
        Action::Idle
    }

    fn nexus_check(&self, state: &GameState) -> Option<NexusCause> {
        let threshold = self.config.auto_nexus_threshold_percent;
        match state.hp {
            Hp::Known(percent) if percent < threshold => {
                Some(NexusCause::LowHp { percent, threshold })
            }
            Hp::Unknown
                if state.consecutive_unknown_hp > self.config.unknown_hp_limit
                    && self.mode.is_aggressive() =>
            {
                Some(NexusCause::HpUnknown {
                    cycles: state.consecutive_unknown_hp,
                })
            }
            _ => None,
        }
    }

    fn flee(&self, state: &GameState) -> Option<(Mode, Action)> {
        let radius = self.config.danger_radius_px;
        let hazards = state.hazards.iter().filter(|_| self.config.flee_hazards);
        let threats: Vec<&Observed> = state
            .projectiles
            .iter()
            .chain(hazards)
            .filter(|o| o.distance_px <= radius)
            .collect();
        if threats.is_empty() {
            return None;
        }
        let direction = flee_direction(
            state.player,
            &threats,
            state.frame_width,
            state.frame_height,
        );
        Some((Mode::Fleeing, Action::MoveTo { direction }))
    }

    fn engage(&mut self, state: &GameState) -> Option<(Mode, Action)> {
        let nearest = state.nearest_enemy()?;
        if nearest.distance_px > self.config.engagement_range_px {
            return None;
        }
        let target = nearest.center();
        let away = retreat_from(state, target);

        if state.hp_degraded() {
            // Health unreadable: back off without trading shots.
            let mode = match self.config.movement_mode {
                MovementMode::Kiting => Mode::Kiting,
                MovementMode::CircleStrafe => Mode::CircleStrafing,
            };
            return Some((mode, Action::MoveTo { direction: away }));
        }

        match self.config.movement_mode {
            MovementMode::Kiting => Some((
                Mode::Kiting,
                Action::Kite {
                    direction: away,
                    target,
                },
            )),
            MovementMode::CircleStrafe => {
                let sign = strafe_sign(
                    state.player,
                    target,
                    self.strafe_sign,
                    self.config.strafe_lookahead_px,
                    state.frame_width,
                    state.frame_height,
                );
                self.strafe_sign = sign;
                let toward = -away;
                Some((
                    Mode::CircleStrafing,
                    Action::CircleStrafe {
                        direction: toward.perpendicular(sign),
                        target,
                        rotation: sign,
                    },
                ))
            }
        }
    }

    fn combat(&self, state: &GameState) -> Option<(Mode, Action)> {
        let nearest = state.nearest_enemy()?;
        let target = nearest.center();
        if state.hp_degraded() {
            // Stays a fighting mode so a long HP blackout still ends in a nexus.
            let direction = retreat_from(state, target);
            return Some((Mode::Combat, Action::MoveTo { direction }));
        }
        Some((Mode::Combat, Action::Attack { target }))
    }
}

/// Unit vector from `target` to the player, or away from the nearest edge when they
/// coincide.
fn retreat_from(state: &GameState, target: Vec2) -> Vec2 {
    (state.player - target)
        .normalized()
        .unwrap_or_else(|| away_from_nearest_edge(state.player, state.frame_width, state.frame_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Category, Detection};
    use crate::frame::FrameStamp;
    use proptest::prelude::*;
    use std::time::Instant;

    const PLAYER: Vec2 = Vec2::new(400.0, 300.0);

    fn observed(category: Category, center: Vec2, confidence: f32) -> Observed {
        let bbox = BoundingBox::new(center.x as u32 - 8, center.y as u32 - 8, 16, 16);
        Observed {
            distance_px: PLAYER.distance(bbox.center()),
            detection: Detection {
                category,
                label: category.as_str().to_string(),
                bbox,
                confidence,
                source: FrameStamp::next(),
            },
        }
    }

    fn state(hp: Hp, enemies: Vec<Observed>, projectiles: Vec<Observed>) -> GameState {
        let mut enemies = enemies;
        enemies.sort_by(crate::state::nearest_order);
        GameState {
            hp,
            enemies,
            projectiles,
            hazards: Vec::new(),
            frame: Some(FrameStamp::next()),
            timestamp: Instant::now(),
            consecutive_unknown_hp: 0,
            frame_width: 800,
            frame_height: 600,
            player: PLAYER,
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig::default())
    }

    #[test]
    fn low_hp_with_nothing_visible_nexuses() {
        let mut engine = DecisionEngine::new(DecisionConfig {
            auto_nexus_threshold_percent: 30.0,
            ..DecisionConfig::default()
        });
        let action = engine.decide(&state(Hp::Known(25.0), vec![], vec![]));
        assert_eq!(action, Action::Nexus);
        assert_eq!(engine.mode(), Mode::Nexusing);
        assert!(matches!(
            engine.nexus_cause(),
            Some(NexusCause::LowHp { .. })
        ));
    }

    #[test]
    fn nearby_projectile_triggers_flee_away_from_it() {
        let mut engine = DecisionEngine::new(DecisionConfig {
            danger_radius_px: 100.0,
            ..DecisionConfig::default()
        });
        let bolt = observed(Category::Projectile, Vec2::new(450.0, 300.0), 0.9);
        assert_eq!(bolt.distance_px, 50.0);
        let action = engine.decide(&state(Hp::Known(80.0), vec![], vec![bolt]));
        assert_eq!(engine.mode(), Mode::Fleeing);
        assert_eq!(
            action,
            Action::MoveTo {
                direction: Vec2::new(-1.0, 0.0)
            }
        );
    }

    #[test]
    fn kites_away_from_nearest_enemy_while_attacking_it() {
        let mut engine = engine();
        let a = observed(Category::Enemy, Vec2::new(520.0, 300.0), 0.9);
        let b = observed(Category::Enemy, Vec2::new(400.0, 220.0), 0.9);
        assert_eq!((a.distance_px, b.distance_px), (120.0, 80.0));
        let action = engine.decide(&state(Hp::Known(90.0), vec![a, b], vec![]));
        assert_eq!(engine.mode(), Mode::Kiting);
        assert_eq!(
            action,
            Action::Kite {
                direction: Vec2::new(0.0, 1.0),
                target: Vec2::new(400.0, 220.0),
            }
        );
    }

    #[test]
    fn circle_strafe_moves_perpendicular_to_enemy() {
        let mut engine = DecisionEngine::new(DecisionConfig {
            movement_mode: MovementMode::CircleStrafe,
            ..DecisionConfig::default()
        });
        let enemy = observed(Category::Enemy, Vec2::new(500.0, 300.0), 0.9);
        let action = engine.decide(&state(Hp::Known(90.0), vec![enemy], vec![]));
        assert_eq!(engine.mode(), Mode::CircleStrafing);
        match action {
            Action::CircleStrafe {
                direction,
                target,
                rotation,
            } => {
                assert_eq!(target, Vec2::new(500.0, 300.0));
                assert_eq!(direction.x, 0.0);
                assert_eq!(direction.y.abs(), 1.0);
                assert_eq!(rotation, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn distant_enemy_is_attacked_in_place() {
        let mut engine = engine();
        let far = observed(Category::Enemy, Vec2::new(750.0, 300.0), 0.9);
        let action = engine.decide(&state(Hp::Known(90.0), vec![far], vec![]));
        assert_eq!(engine.mode(), Mode::Combat);
        assert_eq!(
            action,
            Action::Attack {
                target: Vec2::new(750.0, 300.0)
            }
        );
    }

    #[test]
    fn flee_outranks_engage_by_default_and_priority_is_configurable() {
        let enemy = observed(Category::Enemy, Vec2::new(400.0, 250.0), 0.9);
        let bolt = observed(Category::Projectile, Vec2::new(430.0, 300.0), 0.9);
        let s = state(Hp::Known(90.0), vec![enemy], vec![bolt]);

        let mut default_engine = engine();
        default_engine.decide(&s);
        assert_eq!(default_engine.mode(), Mode::Fleeing);

        let mut aggressive = DecisionEngine::new(DecisionConfig {
            priority: [Rule::Engage, Rule::Flee, Rule::Combat],
            ..DecisionConfig::default()
        });
        aggressive.decide(&s);
        assert_eq!(aggressive.mode(), Mode::Kiting);
    }

    #[test]
    fn degraded_hp_retreats_without_attacking() {
        let mut engine = engine();
        let enemy = observed(Category::Enemy, Vec2::new(400.0, 250.0), 0.9);
        let mut s = state(Hp::Unknown, vec![enemy], vec![]);
        s.consecutive_unknown_hp = 3;
        let action = engine.decide(&s);
        assert_eq!(
            action,
            Action::MoveTo {
                direction: Vec2::new(0.0, 1.0)
            }
        );
    }

    #[test]
    fn degraded_hp_never_attacks_distant_enemies() {
        let mut engine = engine();
        let far = observed(Category::Enemy, Vec2::new(750.0, 300.0), 0.9);
        assert!(far.distance_px > DEFAULT_ENGAGEMENT_RANGE_PX);
        let mut s = state(Hp::Unknown, vec![far], vec![]);
        s.consecutive_unknown_hp = 5;
        let action = engine.decide(&s);
        assert_eq!(
            action,
            Action::MoveTo {
                direction: Vec2::new(-1.0, 0.0)
            }
        );
        assert_eq!(action.aim(), None);
        assert_eq!(engine.mode(), Mode::Combat);

        // A blackout that outlasts the limit still nexuses from here.
        s.consecutive_unknown_hp = DEFAULT_UNKNOWN_HP_LIMIT + 1;
        assert_eq!(engine.decide(&s), Action::Nexus);
    }

    #[test]
    fn unknown_hp_while_fighting_eventually_nexuses() {
        let mut engine = engine();
        let enemy = observed(Category::Enemy, Vec2::new(400.0, 250.0), 0.9);
        engine.decide(&state(Hp::Known(90.0), vec![enemy.clone()], vec![]));
        assert!(engine.mode().is_aggressive());

        let mut s = state(Hp::Unknown, vec![enemy], vec![]);
        s.consecutive_unknown_hp = DEFAULT_UNKNOWN_HP_LIMIT + 1;
        assert_eq!(engine.decide(&s), Action::Nexus);
        assert!(matches!(
            engine.nexus_cause(),
            Some(NexusCause::HpUnknown { .. })
        ));
    }

    #[test]
    fn unknown_hp_while_idle_does_not_nexus() {
        let mut engine = engine();
        let mut s = state(Hp::Unknown, vec![], vec![]);
        s.consecutive_unknown_hp = 1000;
        assert_eq!(engine.decide(&s), Action::Idle);
    }

    #[test]
    fn reset_leaves_nexusing() {
        let mut engine = engine();
        engine.decide(&state(Hp::Known(5.0), vec![], vec![]));
        assert_eq!(engine.decide(&state(Hp::Known(100.0), vec![], vec![])), Action::Nexus);
        engine.reset();
        assert_eq!(engine.decide(&state(Hp::Known(100.0), vec![], vec![])), Action::Idle);
    }

    #[test]
    fn mode_byte_round_trips() {
        for mode in [
            Mode::Idle,
            Mode::Combat,
            Mode::Kiting,
            Mode::CircleStrafing,
            Mode::Fleeing,
            Mode::Nexusing,
        ] {
            assert_eq!(Mode::from_u8(mode.to_u8()), Some(mode));
        }
        assert_eq!(Mode::from_u8(42), None);
    }

    fn arb_state() -> impl Strategy<Value = GameState> {
        (
            prop_oneof![Just(None), (0.0f32..=100.0).prop_map(Some)],
            0u32..40,
            prop::collection::vec((50u32..750, 50u32..550), 0..4),
            prop::collection::vec((50u32..750, 50u32..550), 0..4),
        )
            .prop_map(|(hp, unknown, enemies, projectiles)| {
                let to_obs = |cat, pts: Vec<(u32, u32)>| {
                    pts.into_iter()
                        .map(|(x, y)| observed(cat, Vec2::new(x as f32, y as f32), 0.9))
                        .collect::<Vec<_>>()
                };
                let mut s = state(
                    hp.map_or(Hp::Unknown, Hp::Known),
                    to_obs(Category::Enemy, enemies),
                    to_obs(Category::Projectile, projectiles),
                );
                s.consecutive_unknown_hp = if hp.is_some() { 0 } else { unknown };
                s
            })
    }

    proptest! {
        #[test]
        fn nexus_is_terminal(states in prop::collection::vec(arb_state(), 1..60)) {
            let mut engine = engine();
            let mut nexused = false;
            for s in &states {
                let action = engine.decide(s);
                if nexused {
                    prop_assert_eq!(action, Action::Nexus);
                    prop_assert_eq!(engine.mode(), Mode::Nexusing);
                }
                nexused |= action == Action::Nexus;
            }
        }

        #[test]
        fn actions_carry_unit_directions(s in arb_state()) {
            let mut engine = engine();
            if let Some(dir) = engine.decide(&s).movement() {
                prop_assert!((dir.length() - 1.0).abs() < 1e-4);
            }
        }
    }
}
