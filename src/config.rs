use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS};
use crate::decision::{
    DecisionConfig, MovementMode, Rule, DEFAULT_DANGER_RADIUS_PX, DEFAULT_ENGAGEMENT_RANGE_PX,
    DEFAULT_NEXUS_PERCENT, DEFAULT_PRIORITY, DEFAULT_STRAFE_LOOKAHEAD_PX, DEFAULT_UNKNOWN_HP_LIMIT,
};
use crate::detect::{DetectorConfig, DEFAULT_MERGE_IOU};
use crate::geometry::{Region, Vec2};
use crate::input::{
    ControllerConfig, Key, KeyBinds, KeyCombo, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_STALE_HOLD_TICKS,
};
use crate::safety::{
    SafetyConfig, DEFAULT_HOTKEY, DEFAULT_POINTER_TOLERANCE_PX, DEFAULT_POLL_HZ,
    DEFAULT_YIELD_COOLDOWN_MS,
};
use crate::state::hp::DEFAULT_HP_REGION;
use crate::state::{EstimatorConfig, HpBarConfig, HsvRange};

const DEFAULT_TICK_HZ: u32 = 20;
const MAX_TICK_HZ: u32 = 120;
const DEFAULT_CAPTURE_SOURCE: &str = "stub://empty";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PilotConfigFile {
    tick_rate_hz: Option<u32>,
    max_cycles: Option<u64>,
    hp_bar_region: Option<Region>,
    hp_fill: Option<HsvRange>,
    player_reference: Option<Vec2>,
    auto_nexus_threshold_percent: Option<f32>,
    unknown_hp_limit: Option<u32>,
    movement_mode: Option<MovementMode>,
    danger_radius_px: Option<f32>,
    engagement_range_px: Option<f32>,
    keybinds: Option<KeyBindsFile>,
    emergency_stop_hotkey: Option<String>,
    continuous_attack: Option<bool>,
    stale_hold_ticks: Option<u32>,
    capture: Option<CaptureConfigFile>,
    templates: Option<TemplatesConfigFile>,
    input: Option<InputConfigFile>,
    safety: Option<SafetyConfigFile>,
    decision: Option<DecisionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct KeyBindsFile {
    move_up: Option<String>,
    move_down: Option<String>,
    move_left: Option<String>,
    move_right: Option<String>,
    attack: Option<String>,
    nexus: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    source: Option<String>,
    window_title: Option<String>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TemplatesConfigFile {
    root: Option<PathBuf>,
    merge_iou: Option<f32>,
    play_area: Option<Region>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InputConfigFile {
    backend: Option<String>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SafetyConfigFile {
    stop_file: Option<PathBuf>,
    poll_hz: Option<u32>,
    yield_cooldown_ms: Option<u64>,
    detect_operator_input: Option<bool>,
    pointer_tolerance_px: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DecisionConfigFile {
    priority: Option<Vec<Rule>>,
    flee_hazards: Option<bool>,
    strafe_lookahead_px: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputBackendKind {
    DryRun,
    Xdotool,
}

impl InputBackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "dry-run" | "dry_run" | "dryrun" => Ok(InputBackendKind::DryRun),
            "xdotool" => Ok(InputBackendKind::Xdotool),
            other => Err(anyhow!(
                "unknown input backend '{}' (expected dry-run or xdotool)",
                other
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputBackendKind::DryRun => "dry-run",
            InputBackendKind::Xdotool => "xdotool",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: String,
    pub window_title: Option<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    /// Library root. No root means an empty library (HP-only operation).
    pub root: Option<PathBuf>,
    pub merge_iou: f32,
    pub play_area: Option<Region>,
}

#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub tick_rate_hz: u32,
    pub max_cycles: Option<u64>,
    pub capture: CaptureSettings,
    pub templates: TemplateSettings,
    pub hp_bar_region: Region,
    pub hp_fill: HsvRange,
    pub player_reference: Option<Vec2>,
    pub decision: DecisionConfig,
    pub keybinds: KeyBinds,
    pub continuous_attack: bool,
    pub stale_hold_ticks: u32,
    pub input_backend: InputBackendKind,
    pub max_consecutive_failures: u32,
    pub safety: SafetyConfig,
}

impl PilotConfig {
    /// Load from the file named by `PILOT_CONFIG` (if set), then apply `PILOT_*`
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PILOT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of `PILOT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PilotConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let templates_file = file.templates.unwrap_or_default();
        let input_file = file.input.unwrap_or_default();
        let safety_file = file.safety.unwrap_or_default();
        let decision_file = file.decision.unwrap_or_default();

        let capture = CaptureSettings {
            source: capture_file
                .source
                .unwrap_or_else(|| DEFAULT_CAPTURE_SOURCE.to_string()),
            window_title: capture_file.window_title.filter(|t| !t.trim().is_empty()),
            initial_backoff: Duration::from_millis(
                capture_file
                    .initial_backoff_ms
                    .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                capture_file.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS),
            ),
        };
        let templates = TemplateSettings {
            root: templates_file.root,
            merge_iou: templates_file.merge_iou.unwrap_or(DEFAULT_MERGE_IOU),
            play_area: templates_file.play_area,
        };

        let priority = match decision_file.priority {
            Some(rules) => priority_from(&rules)?,
            None => DEFAULT_PRIORITY,
        };
        let decision = DecisionConfig {
            auto_nexus_threshold_percent: file
                .auto_nexus_threshold_percent
                .unwrap_or(DEFAULT_NEXUS_PERCENT),
            unknown_hp_limit: file.unknown_hp_limit.unwrap_or(DEFAULT_UNKNOWN_HP_LIMIT),
            movement_mode: file.movement_mode.unwrap_or_default(),
            danger_radius_px: file.danger_radius_px.unwrap_or(DEFAULT_DANGER_RADIUS_PX),
            engagement_range_px: file
                .engagement_range_px
                .unwrap_or(DEFAULT_ENGAGEMENT_RANGE_PX),
            priority,
            flee_hazards: decision_file.flee_hazards.unwrap_or(true),
            strafe_lookahead_px: decision_file
                .strafe_lookahead_px
                .unwrap_or(DEFAULT_STRAFE_LOOKAHEAD_PX),
        };

        let keybinds = keybinds_from(file.keybinds.unwrap_or_default())?;
        let hotkey_spec = file
            .emergency_stop_hotkey
            .unwrap_or_else(|| DEFAULT_HOTKEY.to_string());
        let hotkey = KeyCombo::parse(&hotkey_spec)
            .with_context(|| format!("emergency_stop_hotkey '{}'", hotkey_spec))?;

        let safety = SafetyConfig {
            stop_file: safety_file.stop_file,
            poll_hz: safety_file.poll_hz.unwrap_or(DEFAULT_POLL_HZ),
            yield_cooldown_ms: safety_file
                .yield_cooldown_ms
                .unwrap_or(DEFAULT_YIELD_COOLDOWN_MS),
            detect_operator_input: safety_file.detect_operator_input.unwrap_or(true),
            hotkey,
            pointer_tolerance_px: safety_file
                .pointer_tolerance_px
                .unwrap_or(DEFAULT_POINTER_TOLERANCE_PX),
        };

        let input_backend = match input_file.backend.as_deref() {
            Some(name) => InputBackendKind::parse(name)?,
            None => InputBackendKind::DryRun,
        };

        Ok(Self {
            tick_rate_hz: file.tick_rate_hz.unwrap_or(DEFAULT_TICK_HZ),
            max_cycles: file.max_cycles,
            capture,
            templates,
            hp_bar_region: file.hp_bar_region.unwrap_or(DEFAULT_HP_REGION),
            hp_fill: file.hp_fill.unwrap_or_default(),
            player_reference: file.player_reference,
            decision,
            keybinds,
            continuous_attack: file.continuous_attack.unwrap_or(false),
            stale_hold_ticks: file.stale_hold_ticks.unwrap_or(DEFAULT_STALE_HOLD_TICKS),
            input_backend,
            max_consecutive_failures: input_file
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            safety,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("PILOT_CAPTURE_SOURCE") {
            if !source.trim().is_empty() {
                self.capture.source = source;
            }
        }
        if let Ok(root) = std::env::var("PILOT_TEMPLATES") {
            if !root.trim().is_empty() {
                self.templates.root = Some(PathBuf::from(root));
            }
        }
        if let Ok(hz) = std::env::var("PILOT_TICK_HZ") {
            self.tick_rate_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("PILOT_TICK_HZ must be an integer number of ticks per second"))?;
        }
        if let Ok(percent) = std::env::var("PILOT_NEXUS_PERCENT") {
            self.decision.auto_nexus_threshold_percent = percent
                .trim()
                .parse()
                .map_err(|_| anyhow!("PILOT_NEXUS_PERCENT must be a number"))?;
        }
        if let Ok(mode) = std::env::var("PILOT_MOVEMENT_MODE") {
            self.decision.movement_mode = mode
                .parse()
                .map_err(|e: String| anyhow!("PILOT_MOVEMENT_MODE: {}", e))?;
        }
        if let Ok(path) = std::env::var("PILOT_STOP_FILE") {
            if !path.trim().is_empty() {
                self.safety.stop_file = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = std::env::var("PILOT_INPUT_BACKEND") {
            self.input_backend =
                InputBackendKind::parse(&backend).context("PILOT_INPUT_BACKEND")?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_TICK_HZ).contains(&self.tick_rate_hz) {
            return Err(anyhow!(
                "tick_rate_hz must be between 1 and {}",
                MAX_TICK_HZ
            ));
        }
        if self.safety.poll_hz <= self.tick_rate_hz {
            return Err(anyhow!(
                "safety.poll_hz ({}) must be greater than tick_rate_hz ({})",
                self.safety.poll_hz,
                self.tick_rate_hz
            ));
        }
        let threshold = self.decision.auto_nexus_threshold_percent;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(anyhow!(
                "auto_nexus_threshold_percent must be within 0..=100"
            ));
        }
        if !(self.decision.danger_radius_px > 0.0) || !(self.decision.engagement_range_px > 0.0) {
            return Err(anyhow!(
                "danger_radius_px and engagement_range_px must be greater than zero"
            ));
        }
        if !(self.decision.strafe_lookahead_px > 0.0) {
            return Err(anyhow!("decision.strafe_lookahead_px must be greater than zero"));
        }
        if self.hp_bar_region.is_empty() {
            return Err(anyhow!("hp_bar_region must have non-zero width and height"));
        }
        self.hp_fill.validate().context("hp_fill")?;
        self.keybinds.validate()?;
        let iou = self.templates.merge_iou;
        if !(iou > 0.0 && iou < 1.0) {
            return Err(anyhow!("templates.merge_iou must be within (0, 1)"));
        }
        if let Some(area) = self.templates.play_area {
            if area.is_empty() {
                return Err(anyhow!("templates.play_area must not be empty"));
            }
        }
        if self.capture.initial_backoff.is_zero() {
            return Err(anyhow!("capture.initial_backoff_ms must be greater than zero"));
        }
        if self.capture.max_backoff < self.capture.initial_backoff {
            return Err(anyhow!(
                "capture.max_backoff_ms must be at least capture.initial_backoff_ms"
            ));
        }
        if self.stale_hold_ticks == 0 {
            return Err(anyhow!("stale_hold_ticks must be at least 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("input.max_consecutive_failures must be at least 1"));
        }
        if self.safety.pointer_tolerance_px < 0 {
            return Err(anyhow!("safety.pointer_tolerance_px must not be negative"));
        }
        if self.max_cycles == Some(0) {
            return Err(anyhow!("max_cycles must be greater than zero when set"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate_hz.max(1) as u64)
    }

    pub fn decision_config(&self) -> DecisionConfig {
        self.decision.clone()
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            binds: self.keybinds.clone(),
            continuous_attack: self.continuous_attack,
            stale_hold_ticks: self.stale_hold_ticks,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            hp_bar: HpBarConfig {
                region: self.hp_bar_region,
                fill: self.hp_fill,
                ..HpBarConfig::default()
            },
            player_reference: self.player_reference,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            merge_iou: self.templates.merge_iou,
            play_area: self.templates.play_area,
        }
    }
}

fn read_config_file(path: &Path) -> Result<PilotConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn keybinds_from(file: KeyBindsFile) -> Result<KeyBinds> {
    let defaults = KeyBinds::default();
    let bind = |value: Option<String>, default: Key, name: &str| -> Result<Key> {
        match value {
            Some(v) if v.trim().is_empty() => Err(anyhow!("keybinds.{} must not be empty", name)),
            Some(v) => Key::parse(&v).with_context(|| format!("keybinds.{}", name)),
            None => Ok(default),
        }
    };
    Ok(KeyBinds {
        move_up: bind(file.move_up, defaults.move_up, "move_up")?,
        move_down: bind(file.move_down, defaults.move_down, "move_down")?,
        move_left: bind(file.move_left, defaults.move_left, "move_left")?,
        move_right: bind(file.move_right, defaults.move_right, "move_right")?,
        attack: bind(file.attack, defaults.attack, "attack")?,
        nexus: bind(file.nexus, defaults.nexus, "nexus")?,
    })
}

fn priority_from(rules: &[Rule]) -> Result<[Rule; 3]> {
    let is_permutation = rules.len() == 3
        && DEFAULT_PRIORITY.iter().all(|rule| rules.contains(rule));
    if !is_permutation {
        return Err(anyhow!(
            "decision.priority must list flee, engage and combat exactly once"
        ));
    }
    Ok([rules[0], rules[1], rules[2]])
}
