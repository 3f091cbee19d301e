//! Live screen capture via `xcap`.
//!
//! With a window title the first non-minimized window whose title contains it is
//! captured; otherwise the primary monitor. The target is looked up on every capture so
//! a restarted game client is picked up again.

use image::DynamicImage;
use xcap::{Monitor, Window};

use super::{CaptureStats, FrameSource};
use crate::error::{PilotError, Result};
use crate::frame::Frame;

pub struct ScreenSource {
    window_title: Option<String>,
    origin: (i32, i32),
    frames_captured: u64,
    failures: u64,
}

impl ScreenSource {
    pub fn new(window_title: Option<String>) -> Self {
        match &window_title {
            Some(title) => log::info!("ScreenSource: window containing '{}'", title),
            None => log::info!("ScreenSource: primary monitor"),
        }
        Self {
            window_title,
            origin: (0, 0),
            frames_captured: 0,
            failures: 0,
        }
    }

    fn grab(&mut self) -> Result<image::RgbaImage> {
        match &self.window_title {
            Some(title) => {
                let windows = Window::all().map_err(unavailable)?;
                let window = windows
                    .into_iter()
                    .find(|w| w.title().contains(title.as_str()))
                    .ok_or_else(|| {
                        PilotError::CaptureUnavailable(format!("no window titled '{}'", title))
                    })?;
                if window.is_minimized() {
                    return Err(PilotError::CaptureUnavailable(format!(
                        "window '{}' is minimized",
                        window.title()
                    )));
                }
                self.origin = (window.x(), window.y());
                window.capture_image().map_err(unavailable)
            }
            None => {
                let monitors = Monitor::all().map_err(unavailable)?;
                let monitor = monitors
                    .into_iter()
                    .find(|m| m.is_primary())
                    .ok_or_else(|| PilotError::CaptureUnavailable("no primary monitor".into()))?;
                self.origin = (monitor.x(), monitor.y());
                monitor.capture_image().map_err(unavailable)
            }
        }
    }
}

fn unavailable(err: xcap::XCapError) -> PilotError {
    PilotError::CaptureUnavailable(err.to_string())
}

impl FrameSource for ScreenSource {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn capture(&mut self) -> Result<Frame> {
        match self.grab() {
            Ok(rgba) if rgba.width() > 0 && rgba.height() > 0 => {
                self.frames_captured += 1;
                Ok(Frame::new(DynamicImage::ImageRgba8(rgba).to_rgb8()))
            }
            Ok(_) => {
                self.failures += 1;
                Err(PilotError::CaptureUnavailable("captured an empty image".into()))
            }
            Err(err) => {
                self.failures += 1;
                Err(err)
            }
        }
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured,
            failures: self.failures,
            source: match &self.window_title {
                Some(title) => format!("screen:{}", title),
                None => "screen".to_string(),
            },
        }
    }

    fn origin(&self) -> (i32, i32) {
        self.origin
    }
}
