//! Square-marker detection on grayscale frames.

use log::{debug, warn};
use marker_ranging_core::{ColorImageView, GrayImage, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::decode::CellDecoder;
use crate::quad::{connected_components, fit_quad, near_duplicate, Quad, QuadLimits};
use crate::refine::{refine_quad, SubpixParams};
use crate::threshold::{adaptive_threshold_into, IntegralImage};
use crate::{builtin_dictionary, Dictionary, Matcher};

/// Errors raised while configuring a detector.
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("unknown dictionary `{0}`")]
    UnknownDictionary(String),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(&'static str),
}

/// Detection parameters. Rates are relative to the larger image dimension
/// (perimeters) or to the candidate perimeter (distances).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorParams {
    /// Smallest adaptive-threshold window, in pixels (odd).
    pub adaptive_window_min: usize,
    pub adaptive_window_max: usize,
    pub adaptive_window_step: usize,
    /// A pixel is foreground when darker than its window mean by more than this.
    pub adaptive_constant: f32,
    pub min_perimeter_rate: f32,
    pub max_perimeter_rate: f32,
    pub polygonal_approx_rate: f32,
    pub min_corner_distance_rate: f32,
    /// Minimum distance of any corner to the image border, in pixels.
    pub min_distance_to_border: u32,
    /// Candidates whose corners lie closer than this rate of the smaller
    /// perimeter are treated as the same marker.
    pub min_marker_distance_rate: f32,
    /// Width of the black border in cells.
    pub border_bits: usize,
    /// Fraction of `marker_size^2` border cells allowed to read white.
    pub max_erroneous_border_rate: f32,
    /// Candidates with a flatter intensity spread are skipped.
    pub min_otsu_std_dev: f32,
    /// Bit errors tolerated when matching. `None` uses the dictionary's
    /// correction capacity.
    pub max_hamming: Option<u8>,
    pub refine_corners: bool,
    pub subpix: SubpixParams,
    /// Keep at most this many markers per frame.
    pub max_markers: Option<usize>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            adaptive_window_min: 3,
            adaptive_window_max: 23,
            adaptive_window_step: 10,
            adaptive_constant: 7.0,
            min_perimeter_rate: 0.03,
            max_perimeter_rate: 4.0,
            polygonal_approx_rate: 0.03,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3,
            min_marker_distance_rate: 0.05,
            border_bits: 1,
            max_erroneous_border_rate: 0.35,
            min_otsu_std_dev: 5.0,
            max_hamming: None,
            refine_corners: true,
            subpix: SubpixParams::default(),
            max_markers: None,
        }
    }
}

impl DetectorParams {
    fn validate(&self) -> Result<(), DetectorError> {
        if self.adaptive_window_min < 3 {
            return Err(DetectorError::InvalidParams(
                "adaptive_window_min must be at least 3",
            ));
        }
        if self.adaptive_window_max < self.adaptive_window_min {
            return Err(DetectorError::InvalidParams(
                "adaptive_window_max must not be below adaptive_window_min",
            ));
        }
        if self.adaptive_window_step == 0 {
            return Err(DetectorError::InvalidParams(
                "adaptive_window_step must be positive",
            ));
        }
        if !(self.min_perimeter_rate > 0.0 && self.max_perimeter_rate > self.min_perimeter_rate) {
            return Err(DetectorError::InvalidParams(
                "perimeter rates must satisfy 0 < min < max",
            ));
        }
        Ok(())
    }

    /// Odd window sizes tried for adaptive thresholding.
    fn windows(&self) -> impl Iterator<Item = usize> {
        (self.adaptive_window_min..=self.adaptive_window_max)
            .step_by(self.adaptive_window_step)
            .map(|w| w | 1)
    }
}

/// One identified marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerDetection {
    pub id: u32,
    /// Outer corners in image pixels: the marker's own top-left, top-right,
    /// bottom-right and bottom-left, whatever its in-plane rotation.
    pub corners: [Point2<f32>; 4],
    /// Quarter turns between the marker's upright pose and the readout.
    pub rotation: u8,
    pub hamming: u8,
}

impl MarkerDetection {
    /// Integer pixel center: the truncated midpoint of corners 0 and 2.
    pub fn pixel_center(&self) -> Point2<i32> {
        let (a, c) = (self.corners[0], self.corners[2]);
        Point2::new(((a.x + c.x) / 2.0) as i32, ((a.y + c.y) / 2.0) as i32)
    }

    pub fn perimeter(&self) -> f32 {
        (0..4)
            .map(|i| (self.corners[(i + 1) % 4] - self.corners[i]).norm())
            .sum()
    }
}

struct Candidate {
    detection: MarkerDetection,
    seed: usize,
    perimeter: f32,
}

impl Candidate {
    /// Lower Hamming wins, then the larger outline.
    fn better_than(&self, other: &Candidate) -> bool {
        (self.detection.hamming, -self.perimeter) < (other.detection.hamming, -other.perimeter)
    }
}

/// Detector bound to one dictionary.
#[derive(Clone, Debug)]
pub struct MarkerDetector {
    params: DetectorParams,
    matcher: Matcher,
}

impl MarkerDetector {
    pub fn new(dictionary: Dictionary, params: DetectorParams) -> Result<Self, DetectorError> {
        params.validate()?;
        let max_hamming = params
            .max_hamming
            .unwrap_or(dictionary.max_correction_bits);
        Ok(Self {
            matcher: Matcher::new(dictionary, max_hamming),
            params,
        })
    }

    /// Build a detector for an embedded dictionary such as `DICT_4X4_50`.
    pub fn with_dictionary_name(name: &str, params: DetectorParams) -> Result<Self, DetectorError> {
        let dict = builtin_dictionary(name)
            .ok_or_else(|| DetectorError::UnknownDictionary(name.to_string()))?;
        Self::new(dict, params)
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.matcher.dictionary()
    }

    #[inline]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Convert a color frame into `gray` (reallocated only when the frame
    /// size changes) and detect on it. Empty frames yield no detections.
    pub fn detect_frame(
        &self,
        frame: &ColorImageView<'_>,
        gray: &mut GrayImage,
    ) -> Vec<MarkerDetection> {
        if frame.is_empty() {
            warn!(
                "skipping empty frame ({}x{}, {} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            );
            return Vec::new();
        }
        if frame.to_gray_into(gray) {
            debug!("gray buffer resized to {}x{}", gray.width, gray.height);
        }
        self.detect(&gray.view())
    }

    /// Detect markers, one per id, ordered by where their outline is first
    /// met in a raster scan of the image.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = gray.width, height = gray.height))
    )]
    pub fn detect(&self, gray: &GrayImageView<'_>) -> Vec<MarkerDetection> {
        if gray.is_empty() {
            return Vec::new();
        }

        let quads = self.find_quads(gray);
        let mut decoder = CellDecoder::new(self.dictionary().marker_size, self.params.border_bits);
        let max_border_errors = (self.dictionary().bit_count() as f32
            * self.params.max_erroneous_border_rate) as usize;

        let mut candidates: Vec<Candidate> = Vec::new();
        for quad in &quads {
            let Some(cand) = self.identify(gray, quad, &mut decoder, max_border_errors) else {
                continue;
            };
            let limit = |other: &Candidate| {
                self.params.min_marker_distance_rate as f64
                    * cand.perimeter.min(other.perimeter) as f64
            };
            let as_f64 = |c: &[Point2<f32>; 4]| c.map(|p| Point2::new(p.x as f64, p.y as f64));
            let dup = candidates.iter().position(|other| {
                near_duplicate(
                    &as_f64(&cand.detection.corners),
                    &as_f64(&other.detection.corners),
                    limit(other),
                )
            });
            match dup {
                Some(i) if cand.better_than(&candidates[i]) => candidates[i] = cand,
                Some(_) => {}
                None => candidates.push(cand),
            }
        }

        let mut kept = dedup_by_id_keep_best(candidates);
        kept.sort_by_key(|c| c.seed);
        if let Some(cap) = self.params.max_markers {
            kept.truncate(cap);
        }
        debug!("{} quads -> {} markers", quads.len(), kept.len());
        kept.into_iter().map(|c| c.detection).collect()
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    fn find_quads(&self, gray: &GrayImageView<'_>) -> Vec<Quad> {
        let p = &self.params;
        let max_dim = gray.width.max(gray.height) as f64;
        let limits = QuadLimits {
            min_perimeter: p.min_perimeter_rate as f64 * max_dim,
            max_perimeter: p.max_perimeter_rate as f64 * max_dim,
            approx_accuracy_rate: p.polygonal_approx_rate as f64,
            min_corner_distance_rate: p.min_corner_distance_rate as f64,
            min_distance_to_border: p.min_distance_to_border as f64,
            width: gray.width,
            height: gray.height,
        };
        let min_extent = ((limits.min_perimeter / 4.0).floor() as usize).max(2);

        let mut integral = IntegralImage::default();
        integral.compute(gray);
        let mut mask = Vec::new();
        let mut visited = Vec::new();
        let mut quads = Vec::new();
        for win in p.windows() {
            adaptive_threshold_into(gray, &integral, win, p.adaptive_constant, &mut mask);
            let components =
                connected_components(&mask, gray.width, gray.height, min_extent, &mut visited);
            let before = quads.len();
            quads.extend(components.iter().filter_map(|c| fit_quad(c, &limits)));
            debug!(
                "window {win}: {} components, {} quads",
                components.len(),
                quads.len() - before
            );
        }
        quads
    }

    fn identify(
        &self,
        gray: &GrayImageView<'_>,
        quad: &Quad,
        decoder: &mut CellDecoder,
        max_border_errors: usize,
    ) -> Option<Candidate> {
        let mut corners = quad.corners.map(|c| Point2::new(c.x as f32, c.y as f32));
        if self.params.refine_corners {
            let min_side = (0..4)
                .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
                .fold(f32::INFINITY, f32::min);
            let cell_px = min_side / decoder.cells() as f32;
            corners = refine_quad(gray, corners, cell_px, &self.params.subpix);
        }

        let obs = decoder.decode(gray, &corners, self.params.min_otsu_std_dev, max_border_errors)?;
        let m = self.matcher.match_code(obs.code)?;
        let r = m.rotation as usize;
        let detection = MarkerDetection {
            id: m.id,
            corners: [0, 1, 2, 3].map(|k| corners[(k + r) % 4]),
            rotation: m.rotation,
            hamming: m.hamming,
        };
        Some(Candidate {
            perimeter: detection.perimeter(),
            detection,
            seed: quad.seed,
        })
    }
}

/// Keep the best candidate per id, in order of first appearance.
fn dedup_by_id_keep_best(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        match out
            .iter()
            .position(|c| c.detection.id == cand.detection.id)
        {
            Some(i) if cand.better_than(&out[i]) => out[i] = cand,
            Some(_) => {}
            None => out.push(cand),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_windows_are_3_13_23() {
        let w: Vec<usize> = DetectorParams::default().windows().collect();
        assert_eq!(w, vec![3, 13, 23]);
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: DetectorParams =
            serde_json::from_str(r#"{ "adaptive_constant": 9.0, "max_markers": 4 }"#)
                .expect("parse");
        assert_eq!(p.adaptive_constant, 9.0);
        assert_eq!(p.max_markers, Some(4));
        assert_eq!(p.adaptive_window_max, 23);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = DetectorParams {
            adaptive_window_step: 0,
            ..DetectorParams::default()
        };
        assert!(matches!(
            MarkerDetector::with_dictionary_name("DICT_4X4_50", params),
            Err(DetectorError::InvalidParams(_))
        ));
        assert!(matches!(
            MarkerDetector::with_dictionary_name("DICT_7X7_1000", DetectorParams::default()),
            Err(DetectorError::UnknownDictionary(_))
        ));
    }

    #[test]
    fn pixel_center_truncates_diagonal_midpoint() {
        let det = MarkerDetection {
            id: 3,
            corners: [
                Point2::new(10.0, 20.0),
                Point2::new(30.0, 20.0),
                Point2::new(31.0, 41.0),
                Point2::new(10.0, 40.0),
            ],
            rotation: 0,
            hamming: 0,
        };
        assert_eq!(det.pixel_center(), Point2::new(20, 30));
    }
}
