//! Gray and color image buffers.
//!
//! Pixel centers sit at integer coordinates: pixel `(x, y)` covers
//! `[x - 0.5, x + 0.5) x [y - 0.5, y + 0.5)`.

/// Borrowed single-channel image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.width * self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Owned single-channel image.
#[derive(Clone, Debug, Default)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    /// Make the buffer exactly `width x height`.
    ///
    /// Returns `true` if the buffer had to be reallocated. Contents are
    /// unspecified after a reallocation.
    pub fn ensure_size(&mut self, width: usize, height: usize) -> bool {
        if self.width == width && self.height == height && self.data.len() == width * height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.data = vec![0u8; width * height];
        true
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }
}

/// Channel layout of an interleaved 3-channel frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Borrowed interleaved 3-channel image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct ColorImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub order: ChannelOrder,
    pub data: &'a [u8], // len = w*h*3
}

impl ColorImageView<'_> {
    /// `true` for zero-size frames or buffers too short for the declared size.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.width * self.height * 3
    }

    /// Convert to grayscale into `dst`, reallocating it if the resolution changed.
    ///
    /// Uses the BT.601 luma weights in 14-bit fixed point, matching the usual
    /// `BGR2GRAY` conversion bit for bit. Returns `true` if `dst` was reallocated.
    pub fn to_gray_into(&self, dst: &mut GrayImage) -> bool {
        let reallocated = dst.ensure_size(self.width, self.height);
        let (ri, bi) = match self.order {
            ChannelOrder::Rgb => (0, 2),
            ChannelOrder::Bgr => (2, 0),
        };
        for (px, out) in self.data.chunks_exact(3).zip(dst.data.iter_mut()) {
            let r = px[ri] as u32;
            let g = px[1] as u32;
            let b = px[bi] as u32;
            *out = ((r * 4899 + g * 9617 + b * 1868 + 8192) >> 14) as u8;
        }
        reallocated
    }
}

/// Owned interleaved 3-channel image.
#[derive(Clone, Debug, Default)]
pub struct ColorImage {
    pub width: usize,
    pub height: usize,
    pub order: ChannelOrder,
    pub data: Vec<u8>,
}

impl ColorImage {
    pub fn view(&self) -> ColorImageView<'_> {
        ColorImageView {
            width: self.width,
            height: self.height,
            order: self.order,
            data: &self.data,
        }
    }

    /// Replicate a gray image into three identical channels.
    pub fn from_gray(gray: &GrayImage) -> Self {
        let mut data = Vec::with_capacity(gray.data.len() * 3);
        for &v in &gray.data {
            data.extend_from_slice(&[v, v, v]);
        }
        Self {
            width: gray.width,
            height: gray.height,
            order: ChannelOrder::Rgb,
            data,
        }
    }
}

#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, src.width as i32 - 1);
    let y = y.clamp(0, src.height as i32 - 1);
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample with edge clamping. Returns 0 for empty images.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    if src.is_empty() {
        return 0.0;
    }
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray_clamped(src, x0, y0) as f32;
    let p10 = get_gray_clamped(src, x0 + 1, y0) as f32;
    let p01 = get_gray_clamped(src, x0, y0 + 1) as f32;
    let p11 = get_gray_clamped(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_conversion_respects_channel_order() {
        let rgb = [255u8, 0, 0, 0, 0, 255];
        let view = ColorImageView {
            width: 2,
            height: 1,
            order: ChannelOrder::Rgb,
            data: &rgb,
        };
        let mut gray = GrayImage::default();
        assert!(view.to_gray_into(&mut gray));
        assert_eq!(gray.data, vec![76, 29]);

        let bgr = ColorImageView {
            order: ChannelOrder::Bgr,
            ..view
        };
        assert!(!bgr.to_gray_into(&mut gray));
        assert_eq!(gray.data, vec![29, 76]);
    }

    #[test]
    fn gray_buffer_is_reallocated_on_resize_only() {
        let mut gray = GrayImage::default();
        let small = vec![128u8; 4 * 3 * 3];
        let big = vec![128u8; 8 * 6 * 3];
        let v_small = ColorImageView {
            width: 4,
            height: 3,
            order: ChannelOrder::Bgr,
            data: &small,
        };
        let v_big = ColorImageView {
            width: 8,
            height: 6,
            order: ChannelOrder::Bgr,
            data: &big,
        };
        assert!(v_small.to_gray_into(&mut gray));
        assert!(!v_small.to_gray_into(&mut gray));
        assert!(v_big.to_gray_into(&mut gray));
        assert_eq!((gray.width, gray.height), (8, 6));
        assert_eq!(gray.data.len(), 48);
        assert!(gray.data.iter().all(|&v| v == 128));
    }

    #[test]
    fn zero_size_views_are_empty() {
        let v = ColorImageView {
            width: 0,
            height: 480,
            order: ChannelOrder::Rgb,
            data: &[],
        };
        assert!(v.is_empty());
        let g = GrayImageView {
            width: 4,
            height: 4,
            data: &[0u8; 3],
        };
        assert!(g.is_empty());
    }

    #[test]
    fn bilinear_interpolates_between_pixel_centers() {
        let img = GrayImage {
            width: 2,
            height: 1,
            data: vec![0, 100],
        };
        let v = img.view();
        assert_eq!(sample_bilinear(&v, 0.0, 0.0), 0.0);
        assert_eq!(sample_bilinear(&v, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&v, 1.0, 0.0), 100.0);
        assert_eq!(sample_bilinear(&v, 5.0, 3.0), 100.0);
    }
}
