//! Synthetic marker rendering for tests, benches and demos.

use marker_ranging_core::{homography_from_4pt_f64, GrayImage};
use nalgebra::Point2;

use crate::Dictionary;

/// Paint marker `id` into `img` so that its top-left, top-right,
/// bottom-right and bottom-left outer corners land on `corners`.
///
/// A pixel takes the color of the cell its center falls in; pixels outside
/// the marker are left alone. Returns `false` if `id` is not in the
/// dictionary or the quad is degenerate.
pub fn render_marker(
    img: &mut GrayImage,
    dict: &Dictionary,
    id: u32,
    corners: [Point2<f64>; 4],
    border_bits: usize,
) -> bool {
    if dict.code(id).is_none() {
        return false;
    }
    let cells = dict.marker_size + 2 * border_bits;
    let s = cells as f64;
    let canonical = [
        Point2::new(0.0, 0.0),
        Point2::new(s, 0.0),
        Point2::new(s, s),
        Point2::new(0.0, s),
    ];
    let Some(to_marker) = homography_from_4pt_f64(&corners, &canonical) else {
        return false;
    };

    let (min_x, max_x) = corners
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), c| (lo.min(c.x), hi.max(c.x)));
    let (min_y, max_y) = corners
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), c| (lo.min(c.y), hi.max(c.y)));
    let x0 = min_x.floor().max(0.0) as usize;
    let y0 = min_y.floor().max(0.0) as usize;
    let x1 = (max_x.ceil() as usize + 1).min(img.width);
    let y1 = (max_y.ceil() as usize + 1).min(img.height);

    for y in y0..y1 {
        for x in x0..x1 {
            let m = to_marker.apply_f64(Point2::new(x as f64, y as f64));
            if !(m.x >= 0.0 && m.y >= 0.0 && m.x < s && m.y < s) {
                continue;
            }
            let (cx, cy) = (m.x as usize, m.y as usize);
            let white = cx
                .checked_sub(border_bits)
                .zip(cy.checked_sub(border_bits))
                .and_then(|(ix, iy)| dict.is_white(id, ix, iy))
                .unwrap_or(false);
            img.set(x, y, if white { 255 } else { 0 });
        }
    }
    true
}

/// Axis-aligned corners of a square marker with top-left outer corner at
/// `(x, y)` and side `side` pixels.
pub fn square_corners(x: f64, y: f64, side: f64) -> [Point2<f64>; 4] {
    [
        Point2::new(x, y),
        Point2::new(x + side, y),
        Point2::new(x + side, y + side),
        Point2::new(x, y + side),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::DICT_4X4_50;

    #[test]
    fn renders_border_and_bits() {
        let mut img = GrayImage::filled(80, 80, 255);
        // 60 px marker, 10 px cells, outer edge between pixels 9 and 10.
        assert!(render_marker(
            &mut img,
            &DICT_4X4_50,
            0,
            square_corners(9.5, 9.5, 60.0),
            1
        ));
        assert_eq!(img.view().get(9, 9), 255);
        assert_eq!(img.view().get(10, 10), 0);
        // Inner cell (0, 0) of id 0 is white, cell (1, 0) black.
        assert_eq!(img.view().get(25, 25), 255);
        assert_eq!(img.view().get(35, 25), 0);
    }

    #[test]
    fn unknown_id_is_refused() {
        let mut img = GrayImage::filled(10, 10, 255);
        assert!(!render_marker(
            &mut img,
            &DICT_4X4_50,
            50,
            square_corners(1.0, 1.0, 6.0),
            1
        ));
        assert!(img.data.iter().all(|&v| v == 255));
    }
}
