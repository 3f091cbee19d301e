//! Structured session events.
//!
//! Each event is one JSON object on one line, written through the `log` facade under
//! the `pilot::event` target so it can be filtered with `RUST_LOG=pilot::event=info`.

use serde::Serialize;

pub const EVENT_TARGET: &str = "pilot::event";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PilotEvent {
    CycleDecision {
        cycle: u64,
        mode: String,
        action: String,
        hp: Option<f32>,
        enemies: usize,
        projectiles: usize,
        hazards: usize,
    },
    ModeTransition {
        cycle: u64,
        from: String,
        to: String,
    },
    CaptureFailed {
        error: String,
        consecutive: u32,
        retry_in_ms: u64,
    },
    TemplateDegraded {
        label: String,
        reason: String,
    },
    NexusTriggered {
        cycle: u64,
        hp: Option<f32>,
        reason: String,
    },
    InputFault {
        consecutive: u32,
        error: String,
    },
    EmergencyStop {
        reason: String,
    },
    OperatorYield {
        cooldown_ms: u64,
    },
    SessionHalted {
        reason: String,
        cycles: u64,
    },
    StaleDetectionDropped {
        label: String,
        detection_seq: u64,
        frame_seq: u64,
    },
}

impl PilotEvent {
    fn level(&self) -> log::Level {
        match self {
            PilotEvent::CycleDecision { .. } | PilotEvent::StaleDetectionDropped { .. } => {
                log::Level::Debug
            }
            PilotEvent::ModeTransition { .. } | PilotEvent::OperatorYield { .. } => {
                log::Level::Info
            }
            PilotEvent::CaptureFailed { .. }
            | PilotEvent::TemplateDegraded { .. }
            | PilotEvent::InputFault { .. } => log::Level::Warn,
            PilotEvent::NexusTriggered { .. }
            | PilotEvent::EmergencyStop { .. }
            | PilotEvent::SessionHalted { .. } => log::Level::Warn,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"event\":\"unserializable\",\"error\":\"{}\"}}", e))
    }
}

pub fn emit(event: PilotEvent) {
    let level = event.level();
    if log::log_enabled!(target: EVENT_TARGET, level) {
        log::log!(target: EVENT_TARGET, level, "{}", event.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let json = PilotEvent::ModeTransition {
            cycle: 7,
            from: "idle".into(),
            to: "kiting".into(),
        }
        .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "mode_transition");
        assert_eq!(value["cycle"], 7);
        assert_eq!(value["to"], "kiting");
    }

    #[test]
    fn unknown_hp_serializes_as_null() {
        let json = PilotEvent::NexusTriggered {
            cycle: 1,
            hp: None,
            reason: "hp unknown".into(),
        }
        .to_json();
        assert!(json.contains("\"hp\":null"));
    }
}
