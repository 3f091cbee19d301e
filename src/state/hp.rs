//! Health bar reading by color analysis.
//!
//! HSV values use OpenCV units: H in 0..=180, S and V in 0..=255. A hue range with
//! `h_min > h_max` wraps through 0, which is how a red that straddles the hue origin is
//! expressed (e.g. 170..=10).

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};
use crate::frame::Frame;
use crate::geometry::Region;

pub const DEFAULT_HP_REGION: Region = Region::new(50, 900, 200, 20);
pub const DEFAULT_TRACK_MIN_VALUE: u8 = 12;
pub const DEFAULT_TRACK_MAX_VALUE: u8 = 90;
pub const DEFAULT_TOLERANCE: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub h_min: u8,
    pub h_max: u8,
    pub s_min: u8,
    pub s_max: u8,
    pub v_min: u8,
    pub v_max: u8,
}

impl HsvRange {
    /// Bright saturated red.
    pub const RED: HsvRange = HsvRange {
        h_min: 0,
        h_max: 10,
        s_min: 150,
        s_max: 255,
        v_min: 100,
        v_max: 255,
    };

    pub fn contains(&self, (h, s, v): (u8, u8, u8)) -> bool {
        let hue_ok = if self.h_min <= self.h_max {
            (self.h_min..=self.h_max).contains(&h)
        } else {
            h >= self.h_min || h <= self.h_max
        };
        hue_ok && (self.s_min..=self.s_max).contains(&s) && (self.v_min..=self.v_max).contains(&v)
    }

    pub fn validate(&self) -> Result<()> {
        if self.h_min > 180 || self.h_max > 180 {
            return Err(PilotError::Config("hue bounds must be within 0..=180".into()));
        }
        if self.s_min > self.s_max || self.v_min > self.v_max {
            return Err(PilotError::Config(
                "saturation/value minimum exceeds maximum".into(),
            ));
        }
        Ok(())
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::RED
    }
}

/// RGB to HSV in OpenCV 8-bit units.
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * ((gf - bf) / delta)
    } else if max == gf {
        60.0 * ((bf - rf) / delta) + 120.0
    } else {
        60.0 * ((rf - gf) / delta) + 240.0
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };
    (
        (h_deg / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        v.round() as u8,
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct HpBarConfig {
    pub region: Region,
    pub fill: HsvRange,
    /// Unfilled columns must have a mean V inside this band to count as empty track.
    pub track_min_value: u8,
    pub track_max_value: u8,
    /// Fraction of columns allowed to be neither fill nor track, and of filled columns
    /// allowed after the first gap.
    pub tolerance: f32,
}

impl Default for HpBarConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_HP_REGION,
            fill: HsvRange::RED,
            track_min_value: DEFAULT_TRACK_MIN_VALUE,
            track_max_value: DEFAULT_TRACK_MAX_VALUE,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HpReader {
    config: HpBarConfig,
}

impl HpReader {
    pub fn new(config: HpBarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HpBarConfig {
        &self.config
    }

    /// Health percent in [0, 100], or `HpReadUnknown` when the bar is not readable.
    pub fn read(&self, frame: &Frame) -> Result<f32> {
        let region = self.config.region;
        if region.is_empty() {
            return Err(PilotError::HpReadUnknown("hp region is empty".into()));
        }
        if !region.fits_within(frame.width(), frame.height()) {
            return Err(PilotError::HpReadUnknown(format!(
                "hp region {}x{}+{}+{} outside {}x{} frame",
                region.width,
                region.height,
                region.x,
                region.y,
                frame.width(),
                frame.height()
            )));
        }

        let rgb = frame.rgb();
        let mut filled = Vec::with_capacity(region.width as usize);
        let mut foreign = 0u32;
        for cx in region.x..region.x + region.width {
            let mut fill_px = 0u32;
            let mut value_sum = 0u32;
            for cy in region.y..region.y + region.height {
                let hsv = rgb_to_hsv(*rgb.get_pixel(cx, cy));
                if self.config.fill.contains(hsv) {
                    fill_px += 1;
                }
                value_sum += hsv.2 as u32;
            }
            let is_filled = fill_px * 2 >= region.height;
            if !is_filled {
                let mean_v = value_sum / region.height;
                let is_track = (self.config.track_min_value as u32..=self.config.track_max_value as u32)
                    .contains(&mean_v);
                if !is_track {
                    foreign += 1;
                }
            }
            filled.push(is_filled);
        }

        let width = region.width as f32;
        let allowed = (self.config.tolerance * width).floor() as u32;
        if foreign > allowed {
            return Err(PilotError::HpReadUnknown(format!(
                "{} of {} columns are neither fill nor track",
                foreign, region.width
            )));
        }
        let first_gap = filled.iter().position(|f| !f).unwrap_or(filled.len());
        let after_gap = filled[first_gap..].iter().filter(|f| **f).count() as u32;
        if after_gap > allowed {
            return Err(PilotError::HpReadUnknown(format!(
                "fill is fragmented ({} columns after first gap)",
                after_gap
            )));
        }

        let filled_count = filled.iter().filter(|f| **f).count() as f32;
        Ok((filled_count * 100.0 / width).clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const FILL: Rgb<u8> = Rgb([220, 30, 30]);
    const TRACK: Rgb<u8> = Rgb([30, 30, 30]);

    fn bar_frame(percent: u32, occlude: Option<(u32, u32)>) -> Frame {
        let mut rgb = RgbImage::from_pixel(120, 40, Rgb([90, 140, 90]));
        let region = Region::new(10, 20, 100, 10);
        for x in 0..region.width {
            let color = if x < percent { FILL } else { TRACK };
            for y in 0..region.height {
                rgb.put_pixel(region.x + x, region.y + y, color);
            }
        }
        if let Some((from, to)) = occlude {
            for x in from..to {
                for y in 0..region.height {
                    rgb.put_pixel(region.x + x, region.y + y, Rgb([240, 240, 240]));
                }
            }
        }
        Frame::new(rgb)
    }

    fn reader() -> HpReader {
        HpReader::new(HpBarConfig {
            region: Region::new(10, 20, 100, 10),
            ..HpBarConfig::default()
        })
    }

    #[test]
    fn hsv_conversion_matches_opencv_units() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), (0, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), (60, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), (120, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([30, 30, 30])), (0, 0, 30));
        assert!(HsvRange::RED.contains(rgb_to_hsv(FILL)));
    }

    #[test]
    fn wrapping_hue_range() {
        let range = HsvRange {
            h_min: 170,
            h_max: 10,
            ..HsvRange::RED
        };
        assert!(range.contains((175, 200, 200)));
        assert!(range.contains((5, 200, 200)));
        assert!(!range.contains((90, 200, 200)));
    }

    #[test]
    fn reads_fill_fraction() {
        assert_eq!(reader().read(&bar_frame(100, None)).unwrap(), 100.0);
        assert_eq!(reader().read(&bar_frame(25, None)).unwrap(), 25.0);
        assert_eq!(reader().read(&bar_frame(0, None)).unwrap(), 0.0);
    }

    #[test]
    fn occluded_bar_is_unknown() {
        let err = reader().read(&bar_frame(60, Some((50, 80)))).unwrap_err();
        assert!(matches!(err, PilotError::HpReadUnknown(_)));
    }

    #[test]
    fn small_occlusion_is_tolerated() {
        let hp = reader().read(&bar_frame(60, Some((70, 75)))).unwrap();
        assert_eq!(hp, 60.0);
    }

    #[test]
    fn region_outside_frame_is_unknown() {
        let reader = HpReader::new(HpBarConfig::default());
        assert!(reader.read(&bar_frame(50, None)).is_err());
    }

    #[test]
    fn blank_screen_is_unknown() {
        let frame = Frame::new(RgbImage::new(120, 40));
        assert!(reader().read(&frame).is_err());
    }
}
