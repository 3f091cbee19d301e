//! On-disk template library.
//!
//! Layout:
//!
//! ```text
//! <root>/index.json            { "<label>": { "category": "enemy", "threshold": 0.8, "file": "x.png" } }
//! <root>/enemies/<label>.png
//! <root>/projectiles/<label>.png
//! <root>/hazards/<label>.png
//! <root>/ui/<label>.png
//! ```
//!
//! `file` is optional and relative to the category directory. A template that cannot be
//! loaded is left out and recorded as degraded; the rest of the library still loads.

use image::GrayImage;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::matcher::PreparedTemplate;
use super::result::Category;
use crate::error::{PilotError, Result};
use crate::events::{self, PilotEvent};

pub const INDEX_FILE: &str = "index.json";
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.8;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexEntry {
    category: Category,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    file: Option<String>,
}

pub struct Template {
    label: String,
    category: Category,
    threshold: f32,
    prepared: PreparedTemplate,
}

impl Template {
    pub fn new(label: &str, category: Category, threshold: f32, image: &GrayImage) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(PilotError::DetectionDegraded {
                label: label.to_string(),
                reason: format!("threshold {} outside (0, 1]", threshold),
            });
        }
        let prepared = PreparedTemplate::new(image).ok_or_else(|| PilotError::DetectionDegraded {
            label: label.to_string(),
            reason: "template image is empty or flat".to_string(),
        })?;
        Ok(Self {
            label: label.to_string(),
            category,
            threshold,
            prepared,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn prepared(&self) -> &PreparedTemplate {
        &self.prepared
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("label", &self.label)
            .field("category", &self.category)
            .field("threshold", &self.threshold)
            .field("size", &(self.prepared.width(), self.prepared.height()))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DegradedTemplate {
    pub label: String,
    pub reason: String,
}

/// Read-only set of templates. Shared across cycles behind an `Arc`.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    root: Option<PathBuf>,
    templates: Vec<Template>,
    degraded: Vec<DegradedTemplate>,
}

impl TemplateLibrary {
    /// Build a library from already-prepared templates.
    pub fn from_templates(templates: Vec<Template>) -> Self {
        Self {
            root: None,
            templates,
            degraded: Vec::new(),
        }
    }

    /// Load `<root>/index.json` and every template it names.
    ///
    /// A missing or malformed index is an error. Individual templates that fail are
    /// recorded in `degraded()`.
    pub fn load(root: &Path) -> Result<Self> {
        let index_path = root.join(INDEX_FILE);
        let raw = std::fs::read_to_string(&index_path).map_err(|e| {
            PilotError::Library(format!("cannot read {}: {}", index_path.display(), e))
        })?;
        let index: BTreeMap<String, IndexEntry> = serde_json::from_str(&raw).map_err(|e| {
            PilotError::Library(format!("malformed {}: {}", index_path.display(), e))
        })?;

        let mut library = Self {
            root: Some(root.to_path_buf()),
            templates: Vec::with_capacity(index.len()),
            degraded: Vec::new(),
        };
        for (label, entry) in index {
            match load_entry(root, &label, &entry) {
                Ok(template) => library.templates.push(template),
                Err(err) => {
                    let reason = match err {
                        PilotError::DetectionDegraded { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    events::emit(PilotEvent::TemplateDegraded {
                        label: label.clone(),
                        reason: reason.clone(),
                    });
                    library.degraded.push(DegradedTemplate { label, reason });
                }
            }
        }
        log::info!(
            "template library {}: {} loaded, {} degraded",
            root.display(),
            library.templates.len(),
            library.degraded.len()
        );
        Ok(library)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn degraded(&self) -> &[DegradedTemplate] {
        &self.degraded
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn count(&self, category: Category) -> usize {
        self.templates.iter().filter(|t| t.category == category).count()
    }
}

fn load_entry(root: &Path, label: &str, entry: &IndexEntry) -> Result<Template> {
    let dir = root.join(entry.category.dir_name());
    let path = match &entry.file {
        Some(file) => {
            let p = dir.join(file);
            if !p.is_file() {
                return Err(degraded(label, format!("{} not found", p.display())));
            }
            p
        }
        None => find_image(&dir, label).ok_or_else(|| {
            degraded(
                label,
                format!("no {}.{{png,jpg,jpeg,bmp}} in {}", label, dir.display()),
            )
        })?,
    };
    let image = image::open(&path)
        .map_err(|e| degraded(label, format!("{}: {}", path.display(), e)))?
        .to_luma8();
    Template::new(
        label,
        entry.category,
        entry.threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
        &image,
    )
}

fn find_image(dir: &Path, label: &str) -> Option<PathBuf> {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", label, ext)))
        .find(|p| p.is_file())
}

fn degraded(label: &str, reason: String) -> PilotError {
    PilotError::DetectionDegraded {
        label: label.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn sprite() -> GrayImage {
        GrayImage::from_fn(8, 8, |x, y| Luma([if (x + y) % 3 == 0 { 250 } else { 20 }]))
    }

    #[test]
    fn loads_index_and_records_degraded_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("enemies")).unwrap();
        std::fs::create_dir_all(dir.path().join("projectiles")).unwrap();
        sprite().save(dir.path().join("enemies/goblin.png")).unwrap();
        sprite().save(dir.path().join("projectiles/bolt_v2.bmp")).unwrap();
        GrayImage::from_pixel(6, 6, Luma([128]))
            .save(dir.path().join("enemies/flat.png"))
            .unwrap();
        std::fs::write(
            dir.path().join(INDEX_FILE),
            r#"{
                "goblin": {"category": "enemy"},
                "bolt": {"category": "projectile", "threshold": 0.9, "file": "bolt_v2.bmp"},
                "flat": {"category": "enemy"},
                "ghost": {"category": "hazard"}
            }"#,
        )
        .unwrap();

        let library = TemplateLibrary::load(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.count(Category::Enemy), 1);
        let bolt = library
            .templates()
            .iter()
            .find(|t| t.label() == "bolt")
            .unwrap();
        assert_eq!(bolt.threshold(), 0.9);
        let degraded: Vec<_> = library.degraded().iter().map(|d| d.label.as_str()).collect();
        assert_eq!(degraded, vec!["flat", "ghost"]);
    }

    #[test]
    fn missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TemplateLibrary::load(dir.path()),
            Err(PilotError::Library(_))
        ));
    }

    #[test]
    fn unknown_category_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(INDEX_FILE),
            r#"{"x": {"category": "loot"}}"#,
        )
        .unwrap();
        assert!(TemplateLibrary::load(dir.path()).is_err());
    }

    #[test]
    fn threshold_out_of_range_is_degraded() {
        let err = Template::new("x", Category::Enemy, 1.5, &sprite()).unwrap_err();
        assert!(matches!(err, PilotError::DetectionDegraded { .. }));
    }
}
