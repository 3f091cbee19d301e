use rayon::prelude::*;

use super::bbox::BoundingBox;
use super::library::{Template, TemplateLibrary};
use super::matcher::{find_peaks, IntegralImage};
use super::nms::merge_overlapping;
use super::result::{Detection, DetectionSet};
use crate::error::{PilotError, Result};
use crate::frame::Frame;
use crate::geometry::Region;
use crate::safety::CancelToken;

pub const DEFAULT_MERGE_IOU: f32 = 0.3;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorConfig {
    /// Same-category matches overlapping by more than this are merged.
    pub merge_iou: f32,
    /// Restrict matching to this part of the frame.
    pub play_area: Option<Region>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            merge_iou: DEFAULT_MERGE_IOU,
            play_area: None,
        }
    }
}

/// Template detector. Stateless between frames; safe to share across threads.
#[derive(Clone, Debug, Default)]
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Match every template against `frame` and merge overlapping hits.
    ///
    /// Templates run in parallel. Cancellation is observed before each template starts;
    /// once set, the whole call returns `Cancelled`.
    pub fn detect(
        &self,
        frame: &Frame,
        library: &TemplateLibrary,
        cancel: &CancelToken,
    ) -> Result<DetectionSet> {
        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        let stamp = frame.stamp();
        let full = Region::new(0, 0, frame.width(), frame.height());
        let area = match self.config.play_area {
            Some(area) => match area.clamp_to(frame.width(), frame.height()) {
                Some(area) => area,
                None => return Ok(DetectionSet::empty(stamp)),
            },
            None => full,
        };
        if library.is_empty() {
            return Ok(DetectionSet::empty(stamp));
        }

        let gray = frame.gray();
        let integral = IntegralImage::new(gray);

        let per_template: Vec<Option<Vec<Detection>>> = library
            .templates()
            .par_iter()
            .map(|template| {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(match_one(template, gray, &integral, area, stamp))
            })
            .collect();

        if cancel.is_cancelled() || per_template.iter().any(Option::is_none) {
            return Err(PilotError::Cancelled);
        }

        let raw: Vec<Detection> = per_template.into_iter().flatten().flatten().collect();
        let raw_count = raw.len();
        let detections = merge_overlapping(raw, self.config.merge_iou);
        log::trace!(
            "frame {}: {} raw matches, {} after merge",
            stamp.seq,
            raw_count,
            detections.len()
        );
        Ok(DetectionSet {
            frame: stamp,
            detections,
        })
    }
}

fn match_one(
    template: &Template,
    gray: &image::GrayImage,
    integral: &IntegralImage,
    area: Region,
    stamp: crate::frame::FrameStamp,
) -> Vec<Detection> {
    let prepared = template.prepared();
    find_peaks(gray, integral, prepared, area, template.threshold())
        .into_iter()
        .map(|peak| Detection {
            category: template.category(),
            label: template.label().to_string(),
            bbox: BoundingBox::new(peak.x, peak.y, prepared.width(), prepared.height()),
            confidence: peak.score,
            source: stamp,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::Category;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn sprite(seed: u32) -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| {
            Luma([if (x * seed + y * 3) % 5 < 2 { 240 } else { 30 }])
        })
    }

    fn orb() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, y| {
            let (dx, dy) = (x as i32 - 5, y as i32 - 5);
            match dx * dx + dy * dy {
                d if d < 6 => Luma([250]),
                d if d < 16 => Luma([20]),
                _ => Luma([140]),
            }
        })
    }

    fn frame_with(sprites: &[(&GrayImage, u32, u32)]) -> Frame {
        let mut rgb = RgbImage::from_pixel(160, 120, Rgb([70, 90, 60]));
        for (sprite, x, y) in sprites {
            for (sx, sy, p) in sprite.enumerate_pixels() {
                rgb.put_pixel(x + sx, y + sy, Rgb([p[0], p[0], p[0]]));
            }
        }
        Frame::new(rgb)
    }

    fn library() -> TemplateLibrary {
        TemplateLibrary::from_templates(vec![
            Template::new("imp", Category::Enemy, 0.8, &sprite(1)).unwrap(),
            Template::new("imp_alt", Category::Enemy, 0.8, &sprite(1)).unwrap(),
            Template::new("orb", Category::Projectile, 0.8, &orb()).unwrap(),
        ])
    }

    #[test]
    fn finds_sprites_and_merges_duplicate_templates() {
        let enemy = sprite(1);
        let orb = orb();
        let frame = frame_with(&[(&enemy, 20, 30), (&orb, 100, 60)]);
        let set = Detector::default()
            .detect(&frame, &library(), &CancelToken::new())
            .unwrap();

        assert_eq!(set.frame, frame.stamp());
        let enemies: Vec<_> = set.of(Category::Enemy).collect();
        assert_eq!(enemies.len(), 1);
        assert_eq!((enemies[0].bbox.x, enemies[0].bbox.y), (20, 30));
        assert_eq!(enemies[0].label, "imp");
        let orbs: Vec<_> = set.of(Category::Projectile).collect();
        assert_eq!((orbs[0].bbox.x, orbs[0].bbox.y), (100, 60));
        assert!(set.detections.iter().all(|d| d.source == frame.stamp()));
    }

    #[test]
    fn empty_frame_yields_no_detections() {
        let frame = frame_with(&[]);
        let set = Detector::default()
            .detect(&frame, &library(), &CancelToken::new())
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn play_area_excludes_outside_sprites() {
        let enemy = sprite(1);
        let frame = frame_with(&[(&enemy, 120, 90)]);
        let detector = Detector::new(DetectorConfig {
            play_area: Some(Region::new(0, 0, 100, 120)),
            ..DetectorConfig::default()
        });
        let set = detector
            .detect(&frame, &library(), &CancelToken::new())
            .unwrap();
        assert_eq!(set.count(Category::Enemy), 0);
    }

    #[test]
    fn cancelled_detection_returns_cancelled() {
        let frame = frame_with(&[]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Detector::default()
            .detect(&frame, &library(), &cancel)
            .unwrap_err();
        assert!(matches!(err, PilotError::Cancelled));
    }
}
