//! Zero-mean normalized cross-correlation.
//!
//! Scores match OpenCV's `TM_CCOEFF_NORMED`:
//!
//! ```text
//! R(x, y) = sum(T'(u, v) * I(x + u, y + v)) / sqrt(sum(T'^2) * sum(I'^2))
//! ```
//!
//! where `T'` is the zero-mean template and `I'` the zero-mean image window. The window
//! statistics come from integral images, so only the numerator costs a full pass over
//! the template at each position. Negative correlation is reported as 0.

use image::GrayImage;
use rayon::prelude::*;

use crate::geometry::Region;

/// Windows whose summed squared deviation falls below this are treated as flat.
const FLAT_WINDOW_EPSILON: f64 = 1e-3;

/// Template pixels prepared for correlation.
#[derive(Clone, Debug)]
pub struct PreparedTemplate {
    width: u32,
    height: u32,
    zero_mean: Vec<f32>,
    norm: f64,
}

impl PreparedTemplate {
    /// `None` for empty or flat templates: a constant patch correlates with nothing.
    pub fn new(gray: &GrayImage) -> Option<Self> {
        let (width, height) = gray.dimensions();
        let n = (width as usize) * (height as usize);
        if n == 0 {
            return None;
        }
        let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / n as f64;
        let zero_mean: Vec<f32> = gray.pixels().map(|p| (p[0] as f64 - mean) as f32).collect();
        let norm = zero_mean.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        if norm <= FLAT_WINDOW_EPSILON {
            return None;
        }
        Some(Self {
            width,
            height,
            zero_mean,
            norm,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Summed-area tables of pixel values and squared pixel values.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl IntegralImage {
    pub fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0f64; stride * (h + 1)];
        let mut sq = vec![0.0f64; stride * (h + 1)];
        let raw = gray.as_raw();
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    /// (sum, sum of squares) over the `w` x `h` window at (x, y).
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let (a, b, c, d) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq[d] - self.sq[b] - self.sq[c] + self.sq[a],
        )
    }
}

/// A local maximum of the score map, in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Score map of `template` over `area` of `image`. Row-major, one entry per placement.
/// Returns `None` when the template does not fit inside the area.
pub fn score_map(
    image: &GrayImage,
    integral: &IntegralImage,
    template: &PreparedTemplate,
    area: Region,
) -> Option<(Vec<f32>, usize, usize)> {
    if template.width > area.width || template.height > area.height {
        return None;
    }
    let out_w = (area.width - template.width + 1) as usize;
    let out_h = (area.height - template.height + 1) as usize;
    let (tw, th) = (template.width as usize, template.height as usize);
    let n = (tw * th) as f64;
    let img_w = image.width() as usize;
    let raw = image.as_raw();

    let mut scores = vec![0.0f32; out_w * out_h];
    scores
        .par_chunks_mut(out_w)
        .enumerate()
        .for_each(|(oy, row)| {
            let y = area.y as usize + oy;
            for (ox, slot) in row.iter_mut().enumerate() {
                let x = area.x as usize + ox;
                let (sum, sq) = integral.window(x, y, tw, th);
                let var = sq - sum * sum / n;
                if var <= FLAT_WINDOW_EPSILON {
                    continue;
                }
                let mut num = 0.0f64;
                for v in 0..th {
                    let img_row = &raw[(y + v) * img_w + x..(y + v) * img_w + x + tw];
                    let tpl_row = &template.zero_mean[v * tw..(v + 1) * tw];
                    let acc: f32 = img_row
                        .iter()
                        .zip(tpl_row)
                        .map(|(p, t)| *p as f32 * t)
                        .sum();
                    num += acc as f64;
                }
                let r = num / (template.norm * var.sqrt());
                *slot = r.clamp(0.0, 1.0) as f32;
            }
        });
    Some((scores, out_w, out_h))
}

/// Positions scoring at least `threshold` that are not beaten by any 8-neighbour.
pub fn find_peaks(
    image: &GrayImage,
    integral: &IntegralImage,
    template: &PreparedTemplate,
    area: Region,
    threshold: f32,
) -> Vec<Peak> {
    let Some((scores, w, h)) = score_map(image, integral, template, area) else {
        return Vec::new();
    };
    let mut peaks = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let s = scores[y * w + x];
            if s < threshold {
                continue;
            }
            let mut is_max = true;
            'neighbours: for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    if scores[ny * w + nx] > s {
                        is_max = false;
                        break 'neighbours;
                    }
                }
            }
            if is_max {
                peaks.push(Peak {
                    x: area.x + x as u32,
                    y: area.y + y as u32,
                    score: s,
                });
            }
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checker(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x / 2 + y / 3) % 2 == 0 {
                Luma([230])
            } else {
                Luma([40])
            }
        })
    }

    fn scene_with(template: &GrayImage, at: (u32, u32)) -> GrayImage {
        let mut scene = GrayImage::from_pixel(80, 60, Luma([90]));
        image::imageops::replace(&mut scene, template, at.0 as i64, at.1 as i64);
        scene
    }

    #[test]
    fn flat_templates_are_rejected() {
        assert!(PreparedTemplate::new(&GrayImage::from_pixel(8, 8, Luma([7]))).is_none());
        assert!(PreparedTemplate::new(&GrayImage::new(0, 0)).is_none());
    }

    #[test]
    fn integral_window_sums() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let integral = IntegralImage::new(&img);
        let (sum, sq) = integral.window(1, 1, 2, 2);
        assert_eq!(sum, (5 + 6 + 9 + 10) as f64);
        assert_eq!(sq, (25 + 36 + 81 + 100) as f64);
    }

    #[test]
    fn exact_match_scores_one_at_its_position() {
        let tpl = checker(10, 9);
        let scene = scene_with(&tpl, (23, 17));
        let prepared = PreparedTemplate::new(&tpl).unwrap();
        let integral = IntegralImage::new(&scene);
        let full = Region::new(0, 0, scene.width(), scene.height());
        let peaks = find_peaks(&scene, &integral, &prepared, full, 0.8);
        assert!(!peaks.is_empty());
        let best = peaks
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!((best.x, best.y), (23, 17));
        assert!(best.score > 0.999);
    }

    #[test]
    fn brightness_offset_does_not_change_score() {
        let tpl = checker(10, 9);
        let brighter = GrayImage::from_fn(10, 9, |x, y| Luma([tpl.get_pixel(x, y)[0] / 2 + 100]));
        let scene = scene_with(&brighter, (5, 5));
        let prepared = PreparedTemplate::new(&tpl).unwrap();
        let integral = IntegralImage::new(&scene);
        let full = Region::new(0, 0, scene.width(), scene.height());
        let peaks = find_peaks(&scene, &integral, &prepared, full, 0.95);
        assert!(peaks.iter().any(|p| (p.x, p.y) == (5, 5)));
    }

    #[test]
    fn oversized_template_yields_nothing() {
        let tpl = checker(100, 100);
        let scene = GrayImage::from_pixel(80, 60, Luma([90]));
        let prepared = PreparedTemplate::new(&tpl).unwrap();
        let integral = IntegralImage::new(&scene);
        let full = Region::new(0, 0, 80, 60);
        assert!(find_peaks(&scene, &integral, &prepared, full, 0.1).is_empty());
    }

    #[test]
    fn search_respects_area() {
        let tpl = checker(10, 9);
        let scene = scene_with(&tpl, (60, 40));
        let prepared = PreparedTemplate::new(&tpl).unwrap();
        let integral = IntegralImage::new(&scene);
        let left_half = Region::new(0, 0, 40, 60);
        assert!(find_peaks(&scene, &integral, &prepared, left_half, 0.8).is_empty());
        let right = Region::new(50, 30, 30, 30);
        let peaks = find_peaks(&scene, &integral, &prepared, right, 0.8);
        assert!(peaks.iter().any(|p| (p.x, p.y) == (60, 40)));
    }
}
