//! Captured frames.
//!
//! - `Frame`: immutable RGB pixels plus the derived grayscale plane used for matching.
//! - `FrameStamp`: capture sequence number and instant. Detections carry the stamp of
//!   the frame they were computed from, which is how the estimator refuses to mix frames.
//!
//! A frame is owned by the cycle that captured it. There is no mutable accessor and no
//! `Clone`: stages borrow it.

use image::{GrayImage, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_FRAME_SEQ: AtomicU64 = AtomicU64::new(1);

// ----------------------------------------------------------------------------
// FrameStamp
// ----------------------------------------------------------------------------

/// Identity of a captured frame. Sequence numbers are process-unique and increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameStamp {
    pub seq: u64,
    pub captured_at: Instant,
}

impl FrameStamp {
    /// Allocate the stamp for a frame captured now.
    pub fn next() -> Self {
        Self {
            seq: NEXT_FRAME_SEQ.fetch_add(1, Ordering::Relaxed),
            captured_at: Instant::now(),
        }
    }

    pub fn age_ms(&self) -> u64 {
        self.captured_at.elapsed().as_millis() as u64
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    rgb: RgbImage,
    gray: GrayImage,
    stamp: FrameStamp,
}

// Explicitly NOT implementing Clone: a frame belongs to exactly one cycle.

impl Frame {
    /// Wrap freshly captured pixels. Allocates a new stamp.
    pub fn new(rgb: RgbImage) -> Self {
        Self::with_stamp(rgb, FrameStamp::next())
    }

    pub fn with_stamp(rgb: RgbImage, stamp: FrameStamp) -> Self {
        let gray = image::imageops::grayscale(&rgb);
        Self { rgb, gray, stamp }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn stamp(&self) -> FrameStamp {
        self.stamp
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Screen-space center, the default player reference point.
    pub fn center(&self) -> crate::geometry::Vec2 {
        crate::geometry::Vec2::new(self.width() as f32 / 2.0, self.height() as f32 / 2.0)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("seq", &self.stamp.seq)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_unique_and_increasing() {
        let a = FrameStamp::next();
        let b = FrameStamp::next();
        assert!(b.seq > a.seq);
        assert_ne!(a, b);
    }

    #[test]
    fn frame_derives_grayscale_plane() {
        let rgb = RgbImage::from_pixel(4, 3, image::Rgb([200, 200, 200]));
        let frame = Frame::new(rgb);
        assert_eq!(frame.gray().dimensions(), (4, 3));
        assert_eq!(frame.gray().get_pixel(0, 0)[0], 200);
        assert_eq!(frame.center(), crate::geometry::Vec2::new(2.0, 1.5));
    }
}
