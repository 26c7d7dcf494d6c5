//! Global (Otsu) and local-mean (adaptive) thresholding.

use marker_ranging_core::GrayImageView;

/// Otsu threshold over a sample set: values `> t` are the bright class.
///
/// Degenerate inputs (empty, single level) return the only level present,
/// or 127 when there is nothing to look at.
pub(crate) fn otsu_threshold(samples: &[u8]) -> u8 {
    let Some((&lo, &hi)) = samples.iter().min().zip(samples.iter().max()) else {
        return 127;
    };
    if lo == hi {
        return lo;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() == 2 {
        return ((lo as u16 + hi as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let weighted_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(v, &h)| v as f64 * h as f64)
        .sum();

    let (mut w_dark, mut sum_dark) = (0.0f64, 0.0f64);
    let (mut best_t, mut best_var) = (lo, f64::NEG_INFINITY);
    for (t, &h) in hist.iter().enumerate().take(hi as usize) {
        w_dark += h as f64;
        sum_dark += t as f64 * h as f64;
        if w_dark == 0.0 {
            continue;
        }
        let w_bright = total - w_dark;
        let mean_dark = sum_dark / w_dark;
        let mean_bright = (weighted_total - sum_dark) / w_bright;
        let between = w_dark * w_bright * (mean_dark - mean_bright).powi(2);
        if between > best_var {
            best_var = between;
            best_t = t as u8;
        }
    }
    best_t
}

/// Summed-area table with a one-pixel zero border: `(w + 1) x (h + 1)`.
#[derive(Clone, Debug, Default)]
pub(crate) struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn compute(&mut self, src: &GrayImageView<'_>) {
        let (w, h) = (src.width, src.height);
        let stride = w + 1;
        self.width = w;
        self.height = h;
        self.sums.clear();
        self.sums.resize(stride * (h + 1), 0);
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += src.data[y * w + x] as u64;
                self.sums[(y + 1) * stride + x + 1] = self.sums[y * stride + x + 1] + row;
            }
        }
    }

    /// Mean over the window `[x0, x1) x [y0, y1)`.
    #[inline]
    fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f32 {
        let stride = self.width + 1;
        let s = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        s as f32 / ((x1 - x0) * (y1 - y0)) as f32
    }
}

/// Mark pixels darker than their local mean by more than `c`.
///
/// `dst[i]` is 1 for foreground (dark) pixels, 0 otherwise. Windows are
/// `win x win` centered on the pixel and shrink at the image border.
pub(crate) fn adaptive_threshold_into(
    src: &GrayImageView<'_>,
    integral: &IntegralImage,
    win: usize,
    c: f32,
    dst: &mut Vec<u8>,
) {
    let (w, h) = (src.width, src.height);
    dst.clear();
    dst.resize(w * h, 0);
    let r = win / 2;
    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let mean = integral.mean(x0, y0, x1, y1);
            if (src.data[y * w + x] as f32) < mean - c {
                dst[y * w + x] = 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_ranging_core::GrayImage;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![20u8; 40];
        samples.extend(std::iter::repeat_n(30u8, 10));
        samples.extend(std::iter::repeat_n(220u8, 30));
        samples.extend(std::iter::repeat_n(235u8, 20));
        let t = otsu_threshold(&samples);
        assert!((30..220).contains(&t), "threshold {t}");
    }

    #[test]
    fn otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold(&[]), 127);
        assert_eq!(otsu_threshold(&[42, 42, 42]), 42);
        assert_eq!(otsu_threshold(&[0, 200, 0, 200]), 100);
    }

    #[test]
    fn adaptive_marks_dark_side_of_edges_only() {
        // Left half black, right half white.
        let mut img = GrayImage::filled(10, 4, 255);
        for y in 0..4 {
            for x in 0..5 {
                img.set(x, y, 0);
            }
        }
        let view = img.view();
        let mut integral = IntegralImage::default();
        integral.compute(&view);
        let mut bin = Vec::new();
        adaptive_threshold_into(&view, &integral, 3, 7.0, &mut bin);

        for y in 0..4 {
            let row = &bin[y * 10..(y + 1) * 10];
            assert_eq!(row, &[0, 0, 0, 0, 1, 0, 0, 0, 0, 0]);
        }
    }

    #[test]
    fn uniform_image_has_no_foreground() {
        let img = GrayImage::filled(16, 16, 90);
        let view = img.view();
        let mut integral = IntegralImage::default();
        integral.compute(&view);
        let mut bin = Vec::new();
        adaptive_threshold_into(&view, &integral, 13, 7.0, &mut bin);
        assert!(bin.iter().all(|&v| v == 0));
    }
}
