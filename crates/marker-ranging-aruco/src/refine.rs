//! Iterative sub-pixel corner refinement.
//!
//! The refined corner `q` is the point that best satisfies `g(p) . (p - q) = 0`
//! over a window of sample points `p` with image gradients `g(p)`: along a
//! straight edge through `q` the gradient is orthogonal to `p - q`. Each
//! iteration solves the 2x2 normal equations around the current estimate.

use marker_ranging_core::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Sub-pixel refinement parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubpixParams {
    /// Half size of the search window in pixels.
    pub half_window: usize,
    pub max_iterations: usize,
    /// Stop once an update moves the corner by less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iterations: 30,
            epsilon: 0.1,
        }
    }
}

/// Refine one corner. Returns the input unchanged when the window holds no
/// usable gradient structure or the estimate drifts out of the window.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    initial: Point2<f32>,
    half_window: usize,
    params: &SubpixParams,
) -> Point2<f32> {
    if img.is_empty() || half_window == 0 {
        return initial;
    }
    let r = half_window as i32;
    let sigma = half_window as f32;
    let eps_sq = params.epsilon * params.epsilon;

    let mut q = initial;
    for _ in 0..params.max_iterations {
        let mut g = Matrix2::<f32>::zeros();
        let mut b = Vector2::<f32>::zeros();
        for dy in -r..=r {
            for dx in -r..=r {
                let (ox, oy) = (dx as f32, dy as f32);
                let (px, py) = (q.x + ox, q.y + oy);
                let gx = 0.5 * (sample_bilinear(img, px + 1.0, py) - sample_bilinear(img, px - 1.0, py));
                let gy = 0.5 * (sample_bilinear(img, px, py + 1.0) - sample_bilinear(img, px, py - 1.0));
                let w = (-(ox * ox + oy * oy) / (sigma * sigma)).exp();

                let (gxx, gxy, gyy) = (gx * gx * w, gx * gy * w, gy * gy * w);
                g[(0, 0)] += gxx;
                g[(0, 1)] += gxy;
                g[(1, 1)] += gyy;
                b.x += gxx * ox + gxy * oy;
                b.y += gxy * ox + gyy * oy;
            }
        }
        g[(1, 0)] = g[(0, 1)];

        if g.determinant().abs() <= f32::EPSILON * g.norm_squared().max(1.0) {
            break;
        }
        let Some(step) = g.try_inverse().map(|inv| inv * b) else {
            break;
        };
        q += step;
        if step.norm_squared() < eps_sq {
            break;
        }
    }

    let drift = q - initial;
    if !q.x.is_finite() || !q.y.is_finite() || drift.x.abs() > sigma || drift.y.abs() > sigma {
        return initial;
    }
    q
}

/// Refine all four corners of a quad with a window no wider than about half
/// a marker cell, so inner bit edges stay out of the window.
pub(crate) fn refine_quad(
    img: &GrayImageView<'_>,
    corners: [Point2<f32>; 4],
    cell_px: f32,
    params: &SubpixParams,
) -> [Point2<f32>; 4] {
    let cap = ((cell_px * 0.5).floor() as i64 - 1).max(2) as usize;
    let half_window = params.half_window.min(cap);
    corners.map(|c| refine_corner(img, c, half_window, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_ranging_core::GrayImage;

    /// White canvas with a black square covering pixels `[x0, x1) x [y0, y1)`.
    fn black_square(x0: usize, y0: usize, x1: usize, y1: usize) -> GrayImage {
        let mut img = GrayImage::filled(80, 80, 255);
        for y in y0..y1 {
            for x in x0..x1 {
                img.set(x, y, 0);
            }
        }
        img
    }

    #[test]
    fn corner_converges_to_pixel_edge() {
        let img = black_square(20, 20, 60, 60);
        let view = img.view();
        let params = SubpixParams::default();

        let refined = refine_corner(&view, Point2::new(21.0, 21.0), 5, &params);
        assert!((refined.x - 19.5).abs() < 0.2, "x = {}", refined.x);
        assert!((refined.y - 19.5).abs() < 0.2, "y = {}", refined.y);

        let refined = refine_corner(&view, Point2::new(58.0, 59.0), 5, &params);
        assert!((refined.x - 59.5).abs() < 0.2, "x = {}", refined.x);
        assert!((refined.y - 59.5).abs() < 0.2, "y = {}", refined.y);
    }

    #[test]
    fn flat_region_leaves_corner_untouched() {
        let img = GrayImage::filled(40, 40, 128);
        let p = Point2::new(20.3, 17.8);
        assert_eq!(refine_corner(&img.view(), p, 5, &SubpixParams::default()), p);
    }

    #[test]
    fn window_is_capped_by_cell_size() {
        let img = black_square(20, 20, 60, 60);
        let corners = [
            Point2::new(20.0, 20.0),
            Point2::new(59.0, 20.0),
            Point2::new(59.0, 59.0),
            Point2::new(20.0, 59.0),
        ];
        let refined = refine_quad(&img.view(), corners, 4.0, &SubpixParams::default());
        for (r, c) in refined.iter().zip(corners) {
            assert!((r - c).norm() < 1.0);
        }
    }
}
