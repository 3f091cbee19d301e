//! Capture, detection and estimation for one cycle.

use std::sync::Arc;
use std::time::Instant;

use super::shared::Observation;
use crate::capture::{CaptureBackoff, FrameSource};
use crate::detect::{Detector, TemplateLibrary};
use crate::error::{PilotError, Result};
use crate::events::{self, PilotEvent};
use crate::safety::CancelToken;
use crate::state::{GameState, StateEstimator};

pub struct Perception {
    source: Box<dyn FrameSource>,
    detector: Detector,
    library: Arc<TemplateLibrary>,
    estimator: StateEstimator,
    backoff: CaptureBackoff,
    retry_at: Option<Instant>,
    previous: Option<GameState>,
}

/// Result of one perception pass.
pub struct Perceived {
    pub observation: Observation,
    /// Whether a frame was captured (false during capture failures and backoff).
    pub captured: Option<bool>,
}

impl Perception {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Detector,
        library: Arc<TemplateLibrary>,
        estimator: StateEstimator,
        backoff: CaptureBackoff,
    ) -> Self {
        Self {
            source,
            detector,
            library,
            estimator,
            backoff,
            retry_at: None,
            previous: None,
        }
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    /// Produce this cycle's state. Capture failures yield an unobserved state; only
    /// cancellation is an error.
    ///
    /// `captured` is `Some(true)` after a successful capture, `Some(false)` after a
    /// failed one and `None` when the attempt was skipped for backoff.
    pub fn perceive(&mut self, cancel: &CancelToken) -> Result<Perceived> {
        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        let now = Instant::now();
        if matches!(self.retry_at, Some(at) if now < at) {
            return Ok(self.unobserved(None));
        }

        let frame = match self.source.capture() {
            Ok(frame) => {
                self.backoff.reset();
                self.retry_at = None;
                frame
            }
            Err(err) => {
                let delay = self.backoff.failure();
                self.retry_at = Some(now + delay);
                events::emit(PilotEvent::CaptureFailed {
                    error: err.to_string(),
                    consecutive: self.backoff.consecutive(),
                    retry_in_ms: delay.as_millis() as u64,
                });
                return Ok(self.unobserved(Some(false)));
            }
        };

        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        let detections = self.detector.detect(&frame, &self.library, cancel)?;
        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        let state = self
            .estimator
            .estimate(&frame, &detections, self.previous.as_ref());
        self.previous = Some(state.clone());
        Ok(Perceived {
            observation: Observation {
                state,
                origin: self.source.origin(),
            },
            captured: Some(true),
        })
    }

    fn unobserved(&mut self, captured: Option<bool>) -> Perceived {
        let state = self.estimator.estimate_unobserved(self.previous.as_ref());
        self.previous = Some(state.clone());
        Perceived {
            observation: Observation {
                state,
                origin: self.source.origin(),
            },
            captured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Scene, SyntheticSource};
    use crate::state::{EstimatorConfig, Hp};
    use std::time::Duration;

    fn perception(scene: Scene) -> Perception {
        Perception::new(
            Box::new(SyntheticSource::new(scene)),
            Detector::default(),
            Arc::new(TemplateLibrary::default()),
            StateEstimator::new(EstimatorConfig {
                hp_bar: crate::state::HpBarConfig {
                    region: crate::capture::synthetic::HP_REGION,
                    ..Default::default()
                },
                player_reference: None,
            }),
            CaptureBackoff::new(Duration::from_secs(60), Duration::from_secs(60)),
        )
    }

    #[test]
    fn capture_failure_counts_unknown_hp_and_backs_off() {
        let mut p = perception(Scene::Offscreen);
        let cancel = CancelToken::new();
        let first = p.perceive(&cancel).unwrap();
        assert_eq!(first.captured, Some(false));
        assert_eq!(first.observation.state.hp, Hp::Unknown);
        assert_eq!(first.observation.state.consecutive_unknown_hp, 1);

        // Inside the backoff window no capture is attempted, but the cycle still counts.
        let second = p.perceive(&cancel).unwrap();
        assert_eq!(second.captured, None);
        assert_eq!(second.observation.state.consecutive_unknown_hp, 2);
        assert_eq!(p.source().stats().failures, 1);
    }

    #[test]
    fn successful_capture_reads_hp() {
        let mut p = perception(Scene::LowHp);
        let perceived = p.perceive(&CancelToken::new()).unwrap();
        assert_eq!(perceived.captured, Some(true));
        assert_eq!(perceived.observation.state.hp, Hp::Known(20.0));
        assert!(perceived.observation.state.is_observed());
    }

    #[test]
    fn cancellation_is_reported() {
        let mut p = perception(Scene::Empty);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(p.perceive(&cancel), Err(PilotError::Cancelled)));
    }
}
