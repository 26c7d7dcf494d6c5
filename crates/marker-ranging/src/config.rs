//! JSON configuration for a ranging session.

use std::fs;
use std::path::{Path, PathBuf};

use marker_ranging_aruco::{DetectorError, DetectorParams, MarkerDetector};
use marker_ranging_core::CameraModel;
use marker_ranging_pose::{PoseError, PoseEstimator, PoseSolverParams, DEFAULT_MARKER_SIZE_M};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors building a session from a configuration.
#[derive(thiserror::Error, Debug)]
pub enum RangingError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Pose(#[from] PoseError),
}

fn default_marker_size() -> f64 {
    DEFAULT_MARKER_SIZE_M
}

fn default_dictionary() -> String {
    "DICT_4X4_50".to_string()
}

fn default_calibration_path() -> PathBuf {
    PathBuf::from("camera_params.json")
}

/// Everything a session needs besides the camera model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangingConfig {
    /// Physical marker side, in meters.
    #[serde(default = "default_marker_size")]
    pub marker_size_m: f64,
    #[serde(default = "default_dictionary")]
    pub dictionary: String,
    /// Calibration artifact; a missing file selects the default camera.
    #[serde(default = "default_calibration_path")]
    pub calibration_path: PathBuf,
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default)]
    pub detector: DetectorParams,
    #[serde(default)]
    pub pose: PoseSolverParams,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            marker_size_m: default_marker_size(),
            dictionary: default_dictionary(),
            calibration_path: default_calibration_path(),
            max_frames: None,
            detector: DetectorParams::default(),
            pose: PoseSolverParams::default(),
        }
    }
}

impl RangingConfig {
    /// Load a JSON config from disk. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn build_detector(&self) -> Result<MarkerDetector, DetectorError> {
        MarkerDetector::with_dictionary_name(&self.dictionary, self.detector.clone())
    }

    pub fn build_estimator(&self, camera: CameraModel) -> Result<PoseEstimator, PoseError> {
        PoseEstimator::new(camera, self.marker_size_m, self.pose)
    }
}
