//! Synthetic scenes (`stub://<scene>`).
//!
//! Frames are 320x240 with the player at the center and an HP bar at `HP_REGION`. The
//! sprites drawn into scenes are the same images `write_template_library` saves, so a
//! library written by it detects them exactly.

use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::path::Path;
use std::str::FromStr;

use super::{CaptureStats, FrameSource};
use crate::detect::library::INDEX_FILE;
use crate::detect::Category;
use crate::error::{PilotError, Result};
use crate::frame::Frame;
use crate::geometry::Region;

pub const FRAME_WIDTH: u32 = 320;
pub const FRAME_HEIGHT: u32 = 240;
pub const HP_REGION: Region = Region::new(10, 222, 100, 10);
pub const ENEMY_LABEL: &str = "imp";
pub const PROJECTILE_LABEL: &str = "orb";
/// Top-left corner of the enemy sprite in the `enemy` scene.
pub const ENEMY_AT: (u32, u32) = (200, 70);
/// Top-left corner of the projectile sprite in the `projectile` scene.
pub const PROJECTILE_AT: (u32, u32) = (180, 110);

const BAR_FILL: Rgb<u8> = Rgb([220, 30, 30]);
const BAR_TRACK: Rgb<u8> = Rgb([30, 30, 30]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    /// Full health, nothing visible.
    Empty,
    /// Full health, one enemy inside engagement range.
    Enemy,
    /// Full health, one projectile next to the player.
    Projectile,
    /// 20% health, nothing visible.
    LowHp,
    /// The game window is not visible; every capture fails.
    Offscreen,
}

impl Scene {
    pub fn as_str(self) -> &'static str {
        match self {
            Scene::Empty => "empty",
            Scene::Enemy => "enemy",
            Scene::Projectile => "projectile",
            Scene::LowHp => "lowhp",
            Scene::Offscreen => "offscreen",
        }
    }

    fn hp_percent(self) -> u32 {
        match self {
            Scene::LowHp => 20,
            _ => 100,
        }
    }
}

impl FromStr for Scene {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "empty" => Ok(Scene::Empty),
            "enemy" => Ok(Scene::Enemy),
            "projectile" => Ok(Scene::Projectile),
            "lowhp" | "low_hp" => Ok(Scene::LowHp),
            "offscreen" => Ok(Scene::Offscreen),
            other => Err(PilotError::Config(format!("unknown stub scene '{}'", other))),
        }
    }
}

/// Enemy sprite: 14x14 diagonal stripes.
pub fn enemy_sprite() -> GrayImage {
    GrayImage::from_fn(14, 14, |x, y| {
        Luma([if (2 * x + 3 * y) % 7 < 3 { 235 } else { 25 }])
    })
}

/// Projectile sprite: 10x10 bright core in a dark ring.
pub fn projectile_sprite() -> GrayImage {
    GrayImage::from_fn(10, 10, |x, y| {
        let (dx, dy) = (x as i32 - 5, y as i32 - 5);
        match dx * dx + dy * dy {
            d if d < 6 => Luma([250]),
            d if d < 16 => Luma([15]),
            _ => Luma([150]),
        }
    })
}

/// Write a template library containing the scene sprites to `root`.
pub fn write_template_library(root: &Path) -> Result<()> {
    let enemies = root.join(Category::Enemy.dir_name());
    let projectiles = root.join(Category::Projectile.dir_name());
    std::fs::create_dir_all(&enemies)?;
    std::fs::create_dir_all(&projectiles)?;
    save_png(&enemy_sprite(), &enemies.join(format!("{}.png", ENEMY_LABEL)))?;
    save_png(
        &projectile_sprite(),
        &projectiles.join(format!("{}.png", PROJECTILE_LABEL)),
    )?;
    let index = json!({
        ENEMY_LABEL: { "category": "enemy", "threshold": 0.85 },
        PROJECTILE_LABEL: { "category": "projectile", "threshold": 0.85 },
    });
    let body = serde_json::to_string_pretty(&index)
        .map_err(|e| PilotError::Library(format!("index encode failed: {}", e)))?;
    std::fs::write(root.join(INDEX_FILE), body)?;
    Ok(())
}

fn save_png(image: &GrayImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|e| PilotError::Library(format!("{}: {}", path.display(), e)))
}

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

pub struct SyntheticSource {
    scene: Scene,
    rng: StdRng,
    frames_captured: u64,
    failures: u64,
}

impl SyntheticSource {
    pub fn new(scene: Scene) -> Self {
        log::info!("SyntheticSource: scene {}", scene.as_str());
        Self {
            scene,
            rng: StdRng::seed_from_u64(0x5eed),
            frames_captured: 0,
            failures: 0,
        }
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    /// Render one frame of the scene. Background noise differs per frame.
    pub fn render(&mut self) -> RgbImage {
        let rng = &mut self.rng;
        let mut rgb = RgbImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |_, _| {
            let n: i16 = rng.gen_range(-6..=6);
            Rgb([
                (60 + n) as u8,
                (80 + n) as u8,
                (55 + n) as u8,
            ])
        });

        let filled = HP_REGION.width * self.scene.hp_percent() / 100;
        for x in 0..HP_REGION.width {
            let color = if x < filled { BAR_FILL } else { BAR_TRACK };
            for y in 0..HP_REGION.height {
                rgb.put_pixel(HP_REGION.x + x, HP_REGION.y + y, color);
            }
        }

        match self.scene {
            Scene::Enemy => blit(&mut rgb, &enemy_sprite(), ENEMY_AT),
            Scene::Projectile => blit(&mut rgb, &projectile_sprite(), PROJECTILE_AT),
            _ => {}
        }
        rgb
    }
}

fn blit(rgb: &mut RgbImage, sprite: &GrayImage, (x, y): (u32, u32)) {
    for (sx, sy, p) in sprite.enumerate_pixels() {
        rgb.put_pixel(x + sx, y + sy, Rgb([p[0], p[0], p[0]]));
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn capture(&mut self) -> Result<Frame> {
        if self.scene == Scene::Offscreen {
            self.failures += 1;
            return Err(PilotError::CaptureUnavailable(
                "game window is not visible".into(),
            ));
        }
        self.frames_captured += 1;
        Ok(Frame::new(self.render()))
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured,
            failures: self.failures,
            source: format!("stub://{}", self.scene.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detector, TemplateLibrary};
    use crate::safety::CancelToken;
    use crate::state::{HpBarConfig, HpReader};

    fn hp_reader() -> HpReader {
        HpReader::new(HpBarConfig {
            region: HP_REGION,
            ..HpBarConfig::default()
        })
    }

    #[test]
    fn scenes_render_expected_hp() {
        let mut low = SyntheticSource::new(Scene::LowHp);
        let frame = low.capture().unwrap();
        assert_eq!(frame.width(), FRAME_WIDTH);
        assert_eq!(hp_reader().read(&frame).unwrap(), 20.0);

        let mut empty = SyntheticSource::new(Scene::Empty);
        assert_eq!(hp_reader().read(&empty.capture().unwrap()).unwrap(), 100.0);
    }

    #[test]
    fn written_library_detects_scene_sprites() {
        let dir = tempfile::tempdir().unwrap();
        write_template_library(dir.path()).unwrap();
        let library = TemplateLibrary::load(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert!(library.degraded().is_empty());

        let mut source = SyntheticSource::new(Scene::Enemy);
        let frame = source.capture().unwrap();
        let set = Detector::default()
            .detect(&frame, &library, &CancelToken::new())
            .unwrap();
        let enemies: Vec<_> = set.of(Category::Enemy).collect();
        assert_eq!(enemies.len(), 1);
        assert_eq!((enemies[0].bbox.x, enemies[0].bbox.y), ENEMY_AT);
        assert_eq!(set.count(Category::Projectile), 0);
    }

    #[test]
    fn offscreen_scene_fails_capture() {
        let mut source = SyntheticSource::new(Scene::Offscreen);
        assert!(matches!(
            source.capture(),
            Err(PilotError::CaptureUnavailable(_))
        ));
        assert_eq!(source.stats().failures, 1);
        assert_eq!(source.stats().source, "stub://offscreen");
    }

    #[test]
    fn unknown_scene_is_config_error() {
        assert!("meadow".parse::<Scene>().is_err());
        assert_eq!("LowHP".parse::<Scene>().unwrap(), Scene::LowHp);
    }
}
