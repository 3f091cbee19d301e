use serde::Serialize;

use crate::geometry::Vec2;

/// Image-space box in pixels. `x`/`y` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Intersection over union. Degenerate boxes have IoU 0 with everything.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x) as u64;
        let y1 = self.y.max(other.y) as u64;
        let x2 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y2 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        (intersection as f64 / union as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_partial_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 10, 10);
        let iou = a.iou(&b);
        assert!((iou - 25.0 / 175.0).abs() < 1e-6);
        assert_eq!(iou, b.iou(&a));
    }

    #[test]
    fn iou_of_disjoint_and_identical() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(a.iou(&BoundingBox::new(10, 0, 10, 10)), 0.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BoundingBox::new(0, 0, 0, 0)), 0.0);
    }
}
