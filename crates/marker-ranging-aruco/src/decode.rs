//! Bit readout inside a candidate quad.

use marker_ranging_core::{homography_from_4pt, sample_bilinear, GrayImageView};
use nalgebra::Point2;

use crate::threshold::otsu_threshold;

/// Sub-sample offsets inside one cell, in cell units. The outer 30% of each
/// cell is skipped so blur across cell edges does not leak in.
const CELL_TAPS: [f32; 3] = [0.3, 0.5, 0.7];

/// Raw readout of one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MarkerObservation {
    /// Inner bits, row-major from the quad's first corner, white = 1.
    pub code: u64,
    /// Border cells that read white.
    pub border_errors: usize,
}

/// Reads a `(bits + 2 * border)^2` cell grid through a quad.
#[derive(Clone, Debug)]
pub(crate) struct CellDecoder {
    bits: usize,
    border: usize,
    cells: usize,
    /// Sample points in canonical cell units, grouped per cell, row-major.
    taps: Vec<Point2<f32>>,
    scratch: Vec<u8>,
    cell_means: Vec<f32>,
}

impl CellDecoder {
    pub(crate) fn new(bits: usize, border: usize) -> Self {
        let cells = bits + 2 * border;
        let mut taps = Vec::with_capacity(cells * cells * CELL_TAPS.len().pow(2));
        for cy in 0..cells {
            for cx in 0..cells {
                for ty in CELL_TAPS {
                    for tx in CELL_TAPS {
                        taps.push(Point2::new(cx as f32 + tx, cy as f32 + ty));
                    }
                }
            }
        }
        Self {
            bits,
            border,
            cells,
            taps,
            scratch: Vec::new(),
            cell_means: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn cells(&self) -> usize {
        self.cells
    }

    /// Canonical square `[0, cells]^2` corners in quad order.
    fn canonical_corners(&self) -> [Point2<f32>; 4] {
        let s = self.cells as f32;
        [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ]
    }

    /// Sample the grid through `corners` and threshold it.
    ///
    /// Returns `None` when a sample falls outside the image, the quad is
    /// degenerate, the patch has too little contrast (`min_std_dev`) or more
    /// than `max_border_errors` border cells read white.
    pub(crate) fn decode(
        &mut self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f32>; 4],
        min_std_dev: f32,
        max_border_errors: usize,
    ) -> Option<MarkerObservation> {
        let h = homography_from_4pt(&self.canonical_corners(), corners)?;
        let (max_x, max_y) = (img.width as f32 - 0.5, img.height as f32 - 0.5);

        self.scratch.clear();
        for &t in &self.taps {
            let p = h.apply(t);
            if !(p.x >= -0.5 && p.y >= -0.5 && p.x <= max_x && p.y <= max_y) {
                return None;
            }
            self.scratch.push(sample_bilinear(img, p.x, p.y).round() as u8);
        }

        let n = self.scratch.len() as f32;
        let mean = self.scratch.iter().map(|&v| v as f32).sum::<f32>() / n;
        let var = self.scratch
            .iter()
            .map(|&v| (v as f32 - mean).powi(2))
            .sum::<f32>()
            / n;
        if var.sqrt() < min_std_dev {
            return None;
        }
        let thr = otsu_threshold(&self.scratch) as f32;

        let per_cell = CELL_TAPS.len().pow(2);
        self.cell_means.clear();
        self.cell_means.extend(
            self.scratch
                .chunks_exact(per_cell)
                .map(|c| c.iter().map(|&v| v as f32).sum::<f32>() / per_cell as f32),
        );

        let mut border_errors = 0usize;
        let mut code = 0u64;
        for cy in 0..self.cells {
            for cx in 0..self.cells {
                let white = self.cell_means[cy * self.cells + cx] > thr;
                let inner_x = cx.wrapping_sub(self.border);
                let inner_y = cy.wrapping_sub(self.border);
                if inner_x < self.bits && inner_y < self.bits {
                    if white {
                        code |= 1 << (inner_y * self.bits + inner_x);
                    }
                } else if white {
                    border_errors += 1;
                }
            }
        }
        if border_errors > max_border_errors {
            return None;
        }

        Some(MarkerObservation {
            code,
            border_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_ranging_core::GrayImage;

    /// Draw a 6x6-cell marker with 10 px cells at (20, 20), bit pattern `code`.
    fn draw(code: u64) -> GrayImage {
        let mut img = GrayImage::filled(100, 100, 255);
        for cy in 0..6usize {
            for cx in 0..6usize {
                let inner = (1..5).contains(&cx) && (1..5).contains(&cy);
                let white = inner && (code >> ((cy - 1) * 4 + (cx - 1))) & 1 == 1;
                let v = if white { 255 } else { 0 };
                for y in 0..10 {
                    for x in 0..10 {
                        img.set(20 + cx * 10 + x, 20 + cy * 10 + y, v);
                    }
                }
            }
        }
        img
    }

    fn corners() -> [Point2<f32>; 4] {
        [
            Point2::new(19.5, 19.5),
            Point2::new(79.5, 19.5),
            Point2::new(79.5, 79.5),
            Point2::new(19.5, 79.5),
        ]
    }

    #[test]
    fn reads_code_from_axis_aligned_marker() {
        let img = draw(0x4cad);
        let mut dec = CellDecoder::new(4, 1);
        let obs = dec.decode(&img.view(), &corners(), 5.0, 5).expect("decoded");
        assert_eq!(obs.code, 0x4cad);
        assert_eq!(obs.border_errors, 0);
    }

    #[test]
    fn starting_corner_rotates_the_readout() {
        let img = draw(0x4cad);
        let c = corners();
        let mut dec = CellDecoder::new(4, 1);
        let obs = dec
            .decode(&img.view(), &[c[1], c[2], c[3], c[0]], 5.0, 5)
            .expect("decoded");
        // Reading from the top-right corner sees the marker turned a quarter
        // counter-clockwise, i.e. three clockwise turns.
        assert_eq!(obs.code, crate::rotate_code_u64(0x4cad, 4, 3));
    }

    #[test]
    fn uniform_patch_and_out_of_bounds_are_rejected() {
        let blank = GrayImage::filled(100, 100, 200);
        let mut dec = CellDecoder::new(4, 1);
        assert!(dec.decode(&blank.view(), &corners(), 5.0, 5).is_none());

        let img = draw(0x4cad);
        let shifted = corners().map(|p| Point2::new(p.x + 30.0, p.y));
        assert!(dec.decode(&img.view(), &shifted, 5.0, 5).is_none());
    }
}
