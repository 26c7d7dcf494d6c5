//! High-level facade for the `marker-ranging-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, detector and pose crates,
//! - [`RangingSession`]: detect -> pose -> pairwise distances for one frame,
//! - [`run_loop`]: the frame-at-a-time loop over a [`FrameSource`] into an
//!   [`OverlaySink`],
//! - [`RangingConfig`]: JSON configuration with defaults for every field.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//!
//! use marker_ranging::core::CameraModel;
//! use marker_ranging::{run_loop, ImageSequenceSource, LogSink, RangingConfig, RangingSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RangingConfig::default();
//! let camera = CameraModel::load(&config.calibration_path).model;
//! let mut session = RangingSession::from_config(&config, camera)?;
//! let mut source = ImageSequenceSource::open(&["frames/"])?;
//! let summary = run_loop(&mut session, &mut source, &mut LogSink, &AtomicBool::new(false), None);
//! println!("{} frames, stopped by {:?}", summary.frames, summary.reason);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_ranging::core`: image buffers, homographies, the camera model, logging.
//! - `marker_ranging::aruco`: dictionaries and the square-marker detector.
//! - `marker_ranging::pose`: planar PnP, marker poses, metric distances.

pub use marker_ranging_aruco as aruco;
pub use marker_ranging_core as core;
pub use marker_ranging_pose as pose;

pub use marker_ranging_aruco::{DetectorParams, MarkerDetection, MarkerDetector};
pub use marker_ranging_core::{CameraModel, ColorImage, ColorImageView};
pub use marker_ranging_pose::{DistancePair, MarkerPose, PoseEstimator};

mod capture;
mod config;
mod overlay;
mod pipeline;

pub use capture::{CaptureError, FrameSource, InMemorySource};
pub use config::{ConfigError, RangingConfig, RangingError};
pub use overlay::{
    FrameAnnotations, JsonReportSink, LogSink, MarkerAnnotation, OverlaySink, SinkError, SinkSet,
};
pub use pipeline::{quit_after, run_loop, LoopSummary, RangingSession, StopReason};

#[cfg(feature = "image")]
pub use capture::ImageSequenceSource;
