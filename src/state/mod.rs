//! Game state estimation.
//!
//! Fuses one frame's merged detections and the health bar reading into a `GameState`.
//! A state is built once per cycle and never mutated afterwards. Nothing carries over
//! from the previous state except the count of consecutive unreadable health bars.

pub mod hp;

use std::time::Instant;

use crate::detect::{Category, Detection, DetectionSet};
use crate::events::{self, PilotEvent};
use crate::frame::{Frame, FrameStamp};
use crate::geometry::Vec2;

pub use hp::{HpBarConfig, HpReader, HsvRange};

/// Consecutive unknown readings after which health confidence counts as degraded.
pub const DEGRADED_HP_UNKNOWNS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hp {
    Known(f32),
    Unknown,
}

impl Hp {
    pub fn percent(self) -> Option<f32> {
        match self {
            Hp::Known(p) => Some(p),
            Hp::Unknown => None,
        }
    }
}

/// A detection positioned relative to the player.
#[derive(Clone, Debug, PartialEq)]
pub struct Observed {
    pub detection: Detection,
    pub distance_px: f32,
}

impl Observed {
    pub fn center(&self) -> Vec2 {
        self.detection.bbox.center()
    }
}

#[derive(Clone, Debug)]
pub struct GameState {
    pub hp: Hp,
    /// Sorted nearest first.
    pub enemies: Vec<Observed>,
    pub projectiles: Vec<Observed>,
    pub hazards: Vec<Observed>,
    /// Frame this state was derived from; `None` when capture failed this cycle.
    pub frame: Option<FrameStamp>,
    pub timestamp: Instant,
    pub consecutive_unknown_hp: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Player reference point in image space.
    pub player: Vec2,
}

impl GameState {
    /// State before the first observation.
    pub fn initial() -> Self {
        Self {
            hp: Hp::Unknown,
            enemies: Vec::new(),
            projectiles: Vec::new(),
            hazards: Vec::new(),
            frame: None,
            timestamp: Instant::now(),
            consecutive_unknown_hp: 0,
            frame_width: 0,
            frame_height: 0,
            player: Vec2::ZERO,
        }
    }

    pub fn hp_degraded(&self) -> bool {
        self.consecutive_unknown_hp >= DEGRADED_HP_UNKNOWNS
    }

    pub fn nearest_enemy(&self) -> Option<&Observed> {
        self.enemies.first()
    }

    pub fn is_observed(&self) -> bool {
        self.frame.is_some()
    }
}

/// Nearest first. Exact ties go to higher confidence, then smaller box x.
pub fn nearest_order(a: &Observed, b: &Observed) -> std::cmp::Ordering {
    a.distance_px
        .total_cmp(&b.distance_px)
        .then(b.detection.confidence.total_cmp(&a.detection.confidence))
        .then(a.detection.bbox.x.cmp(&b.detection.bbox.x))
}

#[derive(Clone, Debug, Default)]
pub struct EstimatorConfig {
    pub hp_bar: HpBarConfig,
    /// Player reference point; frame center when unset.
    pub player_reference: Option<Vec2>,
}

pub struct StateEstimator {
    reader: HpReader,
    player_reference: Option<Vec2>,
}

impl StateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            reader: HpReader::new(config.hp_bar),
            player_reference: config.player_reference,
        }
    }

    pub fn hp_reader(&self) -> &HpReader {
        &self.reader
    }

    pub fn player_for(&self, frame: &Frame) -> Vec2 {
        self.player_reference.unwrap_or_else(|| frame.center())
    }

    pub fn estimate(
        &self,
        frame: &Frame,
        detections: &DetectionSet,
        previous: Option<&GameState>,
    ) -> GameState {
        let stamp = frame.stamp();
        let player = self.player_for(frame);
        let previous_unknown = previous.map_or(0, |p| p.consecutive_unknown_hp);

        let (hp, consecutive_unknown_hp) = match self.reader.read(frame) {
            Ok(percent) => (Hp::Known(percent), 0),
            Err(err) => {
                log::debug!("frame {}: {}", stamp.seq, err);
                (Hp::Unknown, previous_unknown.saturating_add(1))
            }
        };

        let mut enemies = Vec::new();
        let mut projectiles = Vec::new();
        let mut hazards = Vec::new();
        for detection in &detections.detections {
            if detection.source.seq != stamp.seq {
                events::emit(PilotEvent::StaleDetectionDropped {
                    label: detection.label.clone(),
                    detection_seq: detection.source.seq,
                    frame_seq: stamp.seq,
                });
                continue;
            }
            let bucket = match detection.category {
                Category::Enemy => &mut enemies,
                Category::Projectile => &mut projectiles,
                Category::Hazard => &mut hazards,
                Category::Ui => continue,
            };
            bucket.push(Observed {
                distance_px: player.distance(detection.bbox.center()),
                detection: detection.clone(),
            });
        }
        for bucket in [&mut enemies, &mut projectiles, &mut hazards] {
            bucket.sort_by(nearest_order);
        }

        GameState {
            hp,
            enemies,
            projectiles,
            hazards,
            frame: Some(stamp),
            timestamp: Instant::now(),
            consecutive_unknown_hp,
            frame_width: frame.width(),
            frame_height: frame.height(),
            player,
        }
    }

    /// State for a cycle without a frame: nothing visible, health unknown.
    pub fn estimate_unobserved(&self, previous: Option<&GameState>) -> GameState {
        let base = previous.cloned().unwrap_or_else(GameState::initial);
        GameState {
            hp: Hp::Unknown,
            enemies: Vec::new(),
            projectiles: Vec::new(),
            hazards: Vec::new(),
            frame: None,
            timestamp: Instant::now(),
            consecutive_unknown_hp: base.consecutive_unknown_hp.saturating_add(1),
            frame_width: base.frame_width,
            frame_height: base.frame_height,
            player: self.player_reference.unwrap_or(base.player),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::geometry::Region;
    use image::{Rgb, RgbImage};

    fn frame_with_bar(percent: u32) -> Frame {
        let mut rgb = RgbImage::from_pixel(200, 200, Rgb([80, 120, 80]));
        for x in 0..100 {
            let color = if x < percent { Rgb([220, 30, 30]) } else { Rgb([30, 30, 30]) };
            for y in 0..10 {
                rgb.put_pixel(10 + x, 180 + y, color);
            }
        }
        Frame::new(rgb)
    }

    fn estimator() -> StateEstimator {
        StateEstimator::new(EstimatorConfig {
            hp_bar: HpBarConfig {
                region: Region::new(10, 180, 100, 10),
                ..HpBarConfig::default()
            },
            player_reference: None,
        })
    }

    fn detection(category: Category, x: u32, y: u32, confidence: f32, source: FrameStamp) -> Detection {
        Detection {
            category,
            label: format!("{}@{}", category.as_str(), x),
            bbox: BoundingBox::new(x, y, 10, 10),
            confidence,
            source,
        }
    }

    #[test]
    fn sorts_by_distance_and_files_by_category() {
        let frame = frame_with_bar(80);
        let stamp = frame.stamp();
        let set = DetectionSet {
            frame: stamp,
            detections: vec![
                detection(Category::Enemy, 175, 95, 0.9, stamp),
                detection(Category::Enemy, 115, 95, 0.9, stamp),
                detection(Category::Projectile, 0, 0, 0.9, stamp),
                detection(Category::Ui, 0, 190, 0.9, stamp),
            ],
        };
        let state = estimator().estimate(&frame, &set, None);
        assert_eq!(state.hp, Hp::Known(80.0));
        assert_eq!(state.player, Vec2::new(100.0, 100.0));
        assert_eq!(state.enemies.len(), 2);
        assert_eq!(state.enemies[0].detection.bbox.x, 115);
        assert_eq!(state.enemies[0].distance_px, 20.0);
        assert_eq!(state.projectiles.len(), 1);
        assert!(state.hazards.is_empty());
        assert_eq!(state.frame, Some(stamp));
    }

    #[test]
    fn drops_detections_from_other_frames() {
        let frame = frame_with_bar(80);
        let other = FrameStamp::next();
        let set = DetectionSet {
            frame: frame.stamp(),
            detections: vec![detection(Category::Enemy, 50, 50, 0.9, other)],
        };
        let state = estimator().estimate(&frame, &set, None);
        assert!(state.enemies.is_empty());
    }

    #[test]
    fn equidistant_enemies_prefer_confidence_then_x() {
        let frame = frame_with_bar(80);
        let stamp = frame.stamp();
        let set = DetectionSet {
            frame: stamp,
            detections: vec![
                detection(Category::Enemy, 115, 95, 0.85, stamp),
                detection(Category::Enemy, 75, 95, 0.95, stamp),
                detection(Category::Enemy, 95, 115, 0.95, stamp),
            ],
        };
        let state = estimator().estimate(&frame, &set, None);
        let xs: Vec<_> = state.enemies.iter().map(|o| o.detection.bbox.x).collect();
        assert_eq!(xs, vec![75, 95, 115]);
    }

    #[test]
    fn unknown_counter_accumulates_and_resets() {
        let estimator = estimator();
        let unreadable = Frame::new(RgbImage::new(200, 200));
        let empty = DetectionSet::empty(unreadable.stamp());
        let s1 = estimator.estimate(&unreadable, &empty, None);
        assert_eq!((s1.hp, s1.consecutive_unknown_hp), (Hp::Unknown, 1));
        let s2 = estimator.estimate_unobserved(Some(&s1));
        assert_eq!(s2.consecutive_unknown_hp, 2);
        assert!(!s2.is_observed());
        let s3 = estimator.estimate_unobserved(Some(&s2));
        assert!(s3.hp_degraded());

        let readable = frame_with_bar(50);
        let s4 = estimator.estimate(&readable, &DetectionSet::empty(readable.stamp()), Some(&s3));
        assert_eq!((s4.hp, s4.consecutive_unknown_hp), (Hp::Known(50.0), 0));
    }

    #[test]
    fn nothing_carries_over_from_previous_state() {
        let estimator = estimator();
        let frame = frame_with_bar(80);
        let stamp = frame.stamp();
        let set = DetectionSet {
            frame: stamp,
            detections: vec![detection(Category::Enemy, 10, 10, 0.9, stamp)],
        };
        let first = estimator.estimate(&frame, &set, None);
        let next = frame_with_bar(80);
        let second = estimator.estimate(&next, &DetectionSet::empty(next.stamp()), Some(&first));
        assert!(second.enemies.is_empty());
        assert!(estimator.estimate_unobserved(Some(&first)).enemies.is_empty());
    }
}
