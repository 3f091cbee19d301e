//! Image-space geometry shared by the estimator and the decision engine.
//!
//! Image space: x grows right, y grows down.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const UP: Vec2 = Vec2 { x: 0.0, y: -1.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    /// Unit vector, or `None` when the vector is (numerically) zero.
    pub fn normalized(self) -> Option<Vec2> {
        let len = self.length();
        if len <= f32::EPSILON {
            return None;
        }
        Some(Vec2::new(self.x / len, self.y / len))
    }

    /// Rotate a quarter turn. `sign = +1` is clockwise on screen.
    pub fn perpendicular(self, sign: i8) -> Vec2 {
        if sign >= 0 {
            Vec2::new(-self.y, self.x)
        } else {
            Vec2::new(self.y, -self.x)
        }
    }

    pub fn scale(self, k: f32) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }
}

/// Axis-aligned screen rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the whole region lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }

    /// Intersection with a `width` x `height` image, or `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        let clamped = Region::new(self.x, self.y, w, h);
        (!clamped.is_empty()).then_some(clamped)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perpendicular_is_orthogonal() {
        let v = Vec2::new(3.0, 4.0);
        for sign in [1, -1] {
            let p = v.perpendicular(sign);
            assert_eq!(v.x * p.x + v.y * p.y, 0.0);
            assert_eq!(p.length(), 5.0);
        }
        assert_eq!(v.perpendicular(1), -v.perpendicular(-1));
    }

    #[test]
    fn region_bounds_checks() {
        let region = Region::new(50, 900, 200, 20);
        assert!(region.fits_within(1920, 1080));
        assert!(!region.fits_within(640, 480));
        assert_eq!(region.clamp_to(640, 480), None);
        assert_eq!(
            Region::new(600, 10, 100, 10).clamp_to(640, 480),
            Some(Region::new(600, 10, 40, 10))
        );
    }

    #[test]
    fn zero_vector_has_no_direction() {
        assert!(Vec2::ZERO.normalized().is_none());
        let unit = Vec2::new(0.0, 10.0).normalized().unwrap();
        assert_eq!(unit, Vec2::new(0.0, 1.0));
    }
}
