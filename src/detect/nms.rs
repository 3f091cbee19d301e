//! Class-aware merge of overlapping matches.

use std::cmp::Ordering;

use super::result::{Category, Detection};

/// Deterministic ranking: confidence descending, then x ascending, then y ascending.
/// Remaining ties fall back to box size and label so the order is total.
pub fn rank(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.bbox.x.cmp(&b.bbox.x))
        .then(a.bbox.y.cmp(&b.bbox.y))
        .then(a.bbox.width.cmp(&b.bbox.width))
        .then(a.bbox.height.cmp(&b.bbox.height))
        .then_with(|| a.label.cmp(&b.label))
}

/// Greedy suppression within each category: keep the best-ranked detection, drop every
/// same-category detection whose IoU with a kept one exceeds `iou_threshold`.
///
/// Labels do not separate groups. Two templates of the same enemy firing on the same
/// sprite collapse into one detection.
pub fn merge_overlapping(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| rank(a, b)));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    let mut group_start = 0usize;
    let mut group: Option<Category> = None;

    for det in detections {
        if group != Some(det.category) {
            group = Some(det.category);
            group_start = kept.len();
        }
        let overlaps = kept[group_start..]
            .iter()
            .any(|k| k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }

    kept.sort_by(rank);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::bbox::BoundingBox;
    use crate::frame::FrameStamp;
    use proptest::prelude::*;

    fn det(category: Category, x: u32, y: u32, size: u32, confidence: f32) -> Detection {
        Detection {
            category,
            label: format!("{}_{}", category.as_str(), x),
            bbox: BoundingBox::new(x, y, size, size),
            confidence,
            source: FrameStamp::next(),
        }
    }

    #[test]
    fn keeps_highest_confidence_of_overlapping_pair() {
        let merged = merge_overlapping(
            vec![
                det(Category::Enemy, 0, 0, 10, 0.8),
                det(Category::Enemy, 2, 2, 10, 0.9),
                det(Category::Enemy, 40, 40, 10, 0.85),
            ],
            0.3,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].bbox.x, 2);
        assert_eq!(merged[1].bbox.x, 40);
    }

    #[test]
    fn categories_never_suppress_each_other() {
        let merged = merge_overlapping(
            vec![
                det(Category::Enemy, 0, 0, 10, 0.9),
                det(Category::Projectile, 0, 0, 10, 0.95),
            ],
            0.3,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].category, Category::Projectile);
    }

    #[test]
    fn equal_confidence_prefers_smaller_x() {
        let merged = merge_overlapping(
            vec![
                det(Category::Enemy, 3, 0, 10, 0.9),
                det(Category::Enemy, 1, 0, 10, 0.9),
            ],
            0.3,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].bbox.x, 1);
    }

    fn arb_detection() -> impl Strategy<Value = Detection> {
        (
            prop_oneof![
                Just(Category::Enemy),
                Just(Category::Projectile),
                Just(Category::Hazard),
            ],
            0u32..200,
            0u32..200,
            4u32..40,
            0.0f32..=1.0,
        )
            .prop_map(|(c, x, y, s, conf)| det(c, x, y, s, conf))
    }

    proptest! {
        #[test]
        fn retained_same_category_detections_never_overlap(
            dets in prop::collection::vec(arb_detection(), 0..40),
            threshold in 0.05f32..0.95,
        ) {
            let merged = merge_overlapping(dets.clone(), threshold);
            prop_assert!(merged.len() <= dets.len());
            for (i, a) in merged.iter().enumerate() {
                for b in &merged[i + 1..] {
                    if a.category == b.category {
                        prop_assert!(a.bbox.iou(&b.bbox) <= threshold);
                    }
                }
            }
        }

        #[test]
        fn merge_is_order_independent(
            dets in prop::collection::vec(arb_detection(), 0..20),
        ) {
            let mut reversed = dets.clone();
            reversed.reverse();
            let a: Vec<_> = merge_overlapping(dets, 0.3).into_iter().map(|d| (d.category, d.bbox)).collect();
            let b: Vec<_> = merge_overlapping(reversed, 0.3).into_iter().map(|d| (d.category, d.bbox)).collect();
            prop_assert_eq!(a, b);
        }
    }
}
