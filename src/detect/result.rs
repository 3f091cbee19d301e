use serde::{Deserialize, Serialize};

use super::bbox::BoundingBox;
use crate::frame::FrameStamp;

/// Template category. Determines where the estimator files a detection and which
/// library directory holds the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Enemy,
    Projectile,
    Hazard,
    Ui,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Enemy,
        Category::Projectile,
        Category::Hazard,
        Category::Ui,
    ];

    /// Library subdirectory for this category.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Enemy => "enemies",
            Category::Projectile => "projectiles",
            Category::Hazard => "hazards",
            Category::Ui => "ui",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Enemy => "enemy",
            Category::Projectile => "projectile",
            Category::Hazard => "hazard",
            Category::Ui => "ui",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub category: Category,
    pub label: String,
    pub bbox: BoundingBox,
    /// Normalized cross-correlation score in [0, 1].
    pub confidence: f32,
    #[serde(skip)]
    pub source: FrameStamp,
}

/// Merged detections of one frame.
#[derive(Clone, Debug)]
pub struct DetectionSet {
    pub frame: FrameStamp,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn empty(frame: FrameStamp) -> Self {
        Self {
            frame,
            detections: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn of(&self, category: Category) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(move |d| d.category == category)
    }

    pub fn count(&self, category: Category) -> usize {
        self.of(category).count()
    }
}
