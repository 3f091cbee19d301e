//! Error taxonomy for the control loop.
//!
//! Perception failures (`CaptureUnavailable`, `DetectionDegraded`, `HpReadUnknown`)
//! degrade the game state and never escape the pipeline. Input failures escalate,
//! since a stuck key is unsafe.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("template '{label}' degraded: {reason}")]
    DetectionDegraded { label: String, reason: String },

    #[error("hp bar unreadable: {0}")]
    HpReadUnknown(String),

    #[error("input injection failed: {0}")]
    InputInjectionFailed(String),

    #[error("session halted after {consecutive} consecutive input failures")]
    SessionHalted { consecutive: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("template library error: {0}")]
    Library(String),

    #[error("stage cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotError {
    /// Failures the session may survive by retrying next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PilotError::CaptureUnavailable(_)
                | PilotError::DetectionDegraded { .. }
                | PilotError::HpReadUnknown(_)
                | PilotError::InputInjectionFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_failures_are_recoverable_but_halts_are_not() {
        assert!(PilotError::InputInjectionFailed("xdotool".into()).is_recoverable());
        assert!(!PilotError::SessionHalted { consecutive: 3 }.is_recoverable());
        assert!(!PilotError::Cancelled.is_recoverable());
    }
}
