//! Screenshot replay source (`file://<dir or image>`).
//!
//! Cycles through the PNG/JPEG/BMP files of a directory in name order, or repeats a
//! single image. Files are decoded on every capture; nothing is cached.

use std::path::{Path, PathBuf};

use super::{CaptureStats, FrameSource};
use crate::detect::library::SUPPORTED_EXTENSIONS;
use crate::error::{PilotError, Result};
use crate::frame::Frame;

pub struct ReplaySource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frames_captured: u64,
    failures: u64,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(PilotError::Config(format!(
                "replay path {} does not exist",
                path.display()
            )));
        };
        if files.is_empty() {
            return Err(PilotError::Config(format!(
                "no screenshots in {}",
                path.display()
            )));
        }
        log::info!("ReplaySource: {} frame(s) from {}", files.len(), path.display());
        Ok(Self {
            root: path.to_path_buf(),
            files,
            next: 0,
            frames_captured: 0,
            failures: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn capture(&mut self) -> Result<Frame> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        match image::open(path) {
            Ok(img) => {
                self.frames_captured += 1;
                Ok(Frame::new(img.to_rgb8()))
            }
            Err(err) => {
                self.failures += 1;
                Err(PilotError::CaptureUnavailable(format!(
                    "{}: {}",
                    path.display(),
                    err
                )))
            }
        }
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured,
            failures: self.failures,
            source: format!("file://{}", self.root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn cycles_through_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 4, Rgb([1, 2, 3]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3]))
            .save(dir.path().join("a.bmp"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = ReplaySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);
        let widths: Vec<u32> = (0..3).map(|_| source.capture().unwrap().width()).collect();
        assert_eq!(widths, vec![6, 8, 6]);
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn undecodable_file_is_capture_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let mut source = ReplaySource::open(&path).unwrap();
        assert!(matches!(
            source.capture(),
            Err(PilotError::CaptureUnavailable(_))
        ));
        assert_eq!(source.stats().failures, 1);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ReplaySource::open(dir.path()),
            Err(PilotError::Config(_))
        ));
    }
}
