//! Template detection.
//!
//! - `library`: labeled reference images loaded from disk
//! - `matcher`: normalized cross-correlation over integral images
//! - `nms`: class-aware merge of overlapping matches
//! - `detector`: runs every template over a frame and produces a `DetectionSet`

mod bbox;
mod detector;
pub mod library;
pub mod matcher;
mod nms;
mod result;

pub use bbox::BoundingBox;
pub use detector::{Detector, DetectorConfig, DEFAULT_MERGE_IOU};
pub use library::{DegradedTemplate, Template, TemplateLibrary};
pub use nms::{merge_overlapping, rank};
pub use result::{Category, Detection, DetectionSet};
