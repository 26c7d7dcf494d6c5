//! Pinhole camera model with Brown-Conrady distortion, and its provider.
//!
//! The provider never fails the pipeline: a missing or unreadable calibration
//! artifact degrades to [`CameraModel::default`], a rough 640x480 pinhole
//! approximation, and the choice is reported through `log`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Intrinsics used when no calibration artifact is available.
pub const DEFAULT_CAMERA_MATRIX: [[f32; 3]; 3] =
    [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]];

/// Number of coefficients in the default (zero) distortion vector.
pub const DISTORTION_COEFF_COUNT: usize = 5;

const UNDISTORT_MAX_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("camera matrix has non-finite entries")]
    NonFinite,
    #[error("camera matrix focal lengths must be non-zero (fx={fx}, fy={fy})")]
    ZeroFocalLength { fx: f32, fy: f32 },
    #[error("unsupported distortion vector length {0} (expected 0, 4, 5 or 8)")]
    UnsupportedDistortion(usize),
}

/// On-disk calibration container: two named float arrays.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CalibrationFile {
    camera_matrix: [[f64; 3]; 3],
    #[serde(default, alias = "dist_coeffs", alias = "distortion")]
    dist_coefficients: Vec<f64>,
}

/// Camera intrinsics plus distortion coefficients in OpenCV order
/// (`k1, k2, p1, p2[, k3[, k4, k5, k6]]`).
///
/// Values are stored as `f32`, the precision of the persisted artifact.
/// Immutable once built; all projection math runs in `f64`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraModel {
    matrix: [[f32; 3]; 3],
    distortion: Vec<f32>,
}

/// Where a [`CameraModel`] came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CameraSource {
    File(PathBuf),
    Default,
}

/// Result of [`CameraModel::load`].
#[derive(Clone, Debug)]
pub struct LoadedCamera {
    pub model: CameraModel,
    pub source: CameraSource,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            matrix: DEFAULT_CAMERA_MATRIX,
            distortion: vec![0.0; DISTORTION_COEFF_COUNT],
        }
    }
}

impl CameraModel {
    /// Build a validated model.
    pub fn new(matrix: [[f32; 3]; 3], distortion: Vec<f32>) -> Result<Self, CameraModelError> {
        if matrix.iter().flatten().chain(distortion.iter()).any(|v| !v.is_finite()) {
            return Err(CameraModelError::NonFinite);
        }
        let (fx, fy) = (matrix[0][0], matrix[1][1]);
        if fx.abs() < 1e-6 || fy.abs() < 1e-6 {
            return Err(CameraModelError::ZeroFocalLength { fx, fy });
        }
        if !matches!(distortion.len(), 0 | 4 | 5 | 8) {
            return Err(CameraModelError::UnsupportedDistortion(distortion.len()));
        }
        Ok(Self { matrix, distortion })
    }

    /// Ideal pinhole camera without distortion.
    pub fn pinhole(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self, CameraModelError> {
        Self::new([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]], Vec::new())
    }

    /// Parse a calibration artifact. Entries are narrowed to `f32`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CameraModelError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CameraModelError> {
        let file: CalibrationFile = serde_json::from_str(raw)?;
        let matrix = file.camera_matrix.map(|row| row.map(|v| v as f32));
        let distortion = file.dist_coefficients.iter().map(|&v| v as f32).collect();
        Self::new(matrix, distortion)
    }

    /// Write the model in the same container format [`CameraModel::from_json_file`] reads.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CameraModelError> {
        let file = CalibrationFile {
            camera_matrix: self.matrix.map(|row| row.map(|v| v as f64)),
            dist_coefficients: self.distortion.iter().map(|&v| v as f64).collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load the calibration at `path`, falling back to the default model.
    ///
    /// Never fails: an absent file is reported at `info`, an unreadable one at
    /// `warn`, and both yield [`CameraModel::default`].
    pub fn load(path: impl AsRef<Path>) -> LoadedCamera {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "camera parameters file {} not found, using default intrinsics",
                path.display()
            );
            return LoadedCamera {
                model: Self::default(),
                source: CameraSource::Default,
            };
        }

        match Self::from_json_file(path) {
            Ok(model) => {
                info!("loaded camera parameters from {}", path.display());
                LoadedCamera {
                    model,
                    source: CameraSource::File(path.to_path_buf()),
                }
            }
            Err(err) => {
                warn!(
                    "failed to read camera parameters from {} ({err}), using default intrinsics",
                    path.display()
                );
                LoadedCamera {
                    model: Self::default(),
                    source: CameraSource::Default,
                }
            }
        }
    }

    pub fn matrix(&self) -> [[f32; 3]; 3] {
        self.matrix
    }

    pub fn distortion(&self) -> &[f32] {
        &self.distortion
    }

    /// Intrinsic matrix `K` in `f64`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        let m = self.matrix.map(|row| row.map(|v| v as f64));
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], //
            m[1][0], m[1][1], m[1][2], //
            m[2][0], m[2][1], m[2][2],
        )
    }

    pub fn fx(&self) -> f64 {
        self.matrix[0][0] as f64
    }

    pub fn fy(&self) -> f64 {
        self.matrix[1][1] as f64
    }

    pub fn cx(&self) -> f64 {
        self.matrix[0][2] as f64
    }

    pub fn cy(&self) -> f64 {
        self.matrix[1][2] as f64
    }

    fn skew(&self) -> f64 {
        self.matrix[0][1] as f64
    }

    /// `true` if every distortion coefficient is zero.
    pub fn is_distortion_free(&self) -> bool {
        self.distortion.iter().all(|&k| k == 0.0)
    }

    fn coeff(&self, i: usize) -> f64 {
        self.distortion.get(i).copied().unwrap_or(0.0) as f64
    }

    /// Apply lens distortion to normalized image coordinates.
    pub fn distort_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_distortion_free() {
            return p;
        }
        let (radial, dx, dy) = self.distortion_terms(p.x, p.y);
        Point2::new(p.x * radial + dx, p.y * radial + dy)
    }

    /// Radial factor and tangential offsets at undistorted normalized `(x, y)`.
    fn distortion_terms(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (radial, dx, dy)
    }

    /// Map normalized (distorted) coordinates to pixels.
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx() * p.x + self.skew() * p.y + self.cx(),
            self.fy() * p.y + self.cy(),
        )
    }

    /// Project a camera-frame point to pixels. `None` behind the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 1e-12 {
            return None;
        }
        let n = Point2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let px = self.normalized_to_pixel(self.distort_normalized(n));
        (px.x.is_finite() && px.y.is_finite()).then_some(px)
    }

    /// Map a pixel to undistorted normalized coordinates.
    ///
    /// Distortion is inverted with the usual fixed-point iteration.
    pub fn undistort_pixel(&self, px: Point2<f64>) -> Option<Point2<f64>> {
        let yd = (px.y - self.cy()) / self.fy();
        let xd = (px.x - self.cx() - self.skew() * yd) / self.fx();
        if !xd.is_finite() || !yd.is_finite() {
            return None;
        }
        if self.is_distortion_free() {
            return Some(Point2::new(xd, yd));
        }

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let (radial, dx, dy) = self.distortion_terms(x, y);
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let x_next = (xd - dx) / radial;
            let y_next = (yd - dy) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = (x_next - x).powi(2) + (y_next - y).powi(2);
            x = x_next;
            y = y_next;
            if step <= UNDISTORT_EPS * UNDISTORT_EPS {
                break;
            }
        }
        Some(Point2::new(x, y))
    }
}
