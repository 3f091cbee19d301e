//! Frame sources.
//!
//! Every source produces owned `Frame`s, at most one per cycle:
//! - `stub://<scene>`: deterministic synthetic scenes (testing, dry runs)
//! - `file://<dir or image>`: replay of saved screenshots
//! - `screen`: live capture of the game window or primary monitor (feature: capture-xcap)
//!
//! A failed capture is `CaptureUnavailable`. The caller treats it as "no observation this
//! cycle" and retries on the schedule of a `CaptureBackoff`.

mod replay;
#[cfg(feature = "capture-xcap")]
mod screen;
pub mod synthetic;

use std::time::Duration;

use crate::error::{PilotError, Result};
use crate::frame::Frame;

pub use replay::ReplaySource;
#[cfg(feature = "capture-xcap")]
pub use screen::ScreenSource;
pub use synthetic::{Scene, SyntheticSource};

pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 50;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub source: String,
}

pub trait FrameSource: Send {
    fn name(&self) -> &'static str;

    /// Capture the current display region.
    fn capture(&mut self) -> Result<Frame>;

    fn stats(&self) -> CaptureStats;

    /// Screen position of the frame's top-left pixel.
    fn origin(&self) -> (i32, i32) {
        (0, 0)
    }
}

/// Open the source named by a `capture.source` string.
pub fn open_source(spec: &str, window_title: Option<&str>) -> Result<Box<dyn FrameSource>> {
    let spec = spec.trim();
    if let Some(scene) = spec.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(scene.parse()?)));
    }
    if let Some(path) = spec.strip_prefix("file://") {
        return Ok(Box::new(ReplaySource::open(std::path::Path::new(path))?));
    }
    if spec == "screen" {
        #[cfg(feature = "capture-xcap")]
        {
            return Ok(Box::new(ScreenSource::new(window_title.map(str::to_string))));
        }
        #[cfg(not(feature = "capture-xcap"))]
        {
            let _ = window_title;
            return Err(PilotError::Config(
                "screen capture requires the capture-xcap feature".into(),
            ));
        }
    }
    Err(PilotError::Config(format!(
        "unknown capture source '{}' (expected stub://<scene>, file://<path> or screen)",
        spec
    )))
}

// ----------------------------------------------------------------------------
// Backoff
// ----------------------------------------------------------------------------

/// Retry schedule after capture failures: the delay doubles per consecutive failure and
/// is capped at `max`. A success resets it.
#[derive(Clone, Debug)]
pub struct CaptureBackoff {
    initial: Duration,
    max: Duration,
    consecutive: u32,
}

impl CaptureBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            consecutive: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn failure(&mut self) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        let shift = (self.consecutive - 1).min(20);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

impl Default for CaptureBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut backoff = CaptureBackoff::new(Duration::from_millis(50), Duration::from_millis(300));
        let delays: Vec<u64> = (0..5).map(|_| backoff.failure().as_millis() as u64).collect();
        assert_eq!(delays, vec![50, 100, 200, 300, 300]);
        assert_eq!(backoff.consecutive(), 5);
        backoff.reset();
        assert_eq!(backoff.failure(), Duration::from_millis(50));
    }

    #[test]
    fn open_source_dispatches_on_scheme() {
        let source = open_source("stub://enemy", None).unwrap();
        assert_eq!(source.name(), "synthetic");
        assert!(matches!(
            open_source("rtsp://camera", None),
            Err(PilotError::Config(_))
        ));
        assert!(matches!(
            open_source("stub://volcano", None),
            Err(PilotError::Config(_))
        ));
    }

    #[cfg(not(feature = "capture-xcap"))]
    #[test]
    fn screen_requires_feature() {
        assert!(matches!(
            open_source("screen", Some("Realm")),
            Err(PilotError::Config(_))
        ));
    }
}
