//! The per-frame ranging loop.
//!
//! A [`RangingSession`] owns everything that survives between frames: the
//! detector, the pose estimator (camera model plus marker size) and the
//! reusable gray buffer. [`run_loop`] drives it from a [`FrameSource`] into an
//! [`OverlaySink`] until the stream ends, a read fails, the quit flag is set
//! or the frame budget is spent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use marker_ranging_aruco::MarkerDetector;
use marker_ranging_core::{CameraModel, ColorImageView, GrayImage};
use marker_ranging_pose::{marker_label, pairwise_distances, PoseEstimator};
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::capture::FrameSource;
use crate::config::{RangingConfig, RangingError};
use crate::overlay::{FrameAnnotations, MarkerAnnotation, OverlaySink};

/// Detector, estimator and scratch state for one video stream.
#[derive(Debug)]
pub struct RangingSession {
    detector: MarkerDetector,
    estimator: PoseEstimator,
    gray: GrayImage,
    frame_index: usize,
}

impl RangingSession {
    pub fn new(detector: MarkerDetector, estimator: PoseEstimator) -> Self {
        Self {
            detector,
            estimator,
            gray: GrayImage::default(),
            frame_index: 0,
        }
    }

    pub fn from_config(config: &RangingConfig, camera: CameraModel) -> Result<Self, RangingError> {
        let detector = config.build_detector()?;
        let estimator = config.build_estimator(camera)?;
        info!(
            "session: dictionary {}, marker side {} m, fx {:.1}",
            detector.dictionary().name,
            estimator.marker_size(),
            estimator.camera().fx()
        );
        Ok(Self::new(detector, estimator))
    }

    pub fn detector(&self) -> &MarkerDetector {
        &self.detector
    }

    pub fn estimator(&self) -> &PoseEstimator {
        &self.estimator
    }

    /// Gray conversion of the most recent frame.
    pub fn gray_buffer(&self) -> &GrayImage {
        &self.gray
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> usize {
        self.frame_index
    }

    /// Detect, solve poses and compute pair distances for one frame.
    ///
    /// Never fails: an empty frame gives empty annotations and a marker whose
    /// pose cannot be solved is annotated without a pose and left out of the
    /// pairs.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(frame = self.frame_index))
    )]
    pub fn process_frame(&mut self, frame: &ColorImageView<'_>) -> FrameAnnotations {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let detections = self.detector.detect_frame(frame, &mut self.gray);
        let poses = self.estimator.estimate_all(&detections);
        let pairs = pairwise_distances(&poses, &detections);
        debug!(
            "frame {frame_index}: {} detections, {} poses, {} pairs",
            detections.len(),
            poses.len(),
            pairs.len()
        );

        let markers = detections
            .iter()
            .map(|det| MarkerAnnotation {
                id: det.id,
                label: marker_label(det.id),
                pixel_center: det.pixel_center(),
                corners: det.corners,
                pose: poses.iter().find(|p| p.id == det.id).cloned(),
            })
            .collect();

        FrameAnnotations {
            frame_index,
            width: frame.width,
            height: frame.height,
            markers,
            pairs,
        }
    }
}

/// Why [`run_loop`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EndOfStream,
    /// A frame could not be read; treated as the end of the stream.
    ReadError,
    Quit,
    FrameBudget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
    pub frames: usize,
    pub reason: StopReason,
}

/// Process frames until the source is exhausted, a read fails, `quit` is set
/// or `max_frames` frames have been handled.
///
/// `quit` is checked once per iteration, before the frame read.
pub fn run_loop(
    session: &mut RangingSession,
    source: &mut dyn FrameSource,
    sink: &mut dyn OverlaySink,
    quit: &AtomicBool,
    max_frames: Option<usize>,
) -> LoopSummary {
    info!("ranging over {}", source.describe());
    let mut frames = 0usize;
    let reason = loop {
        if quit.load(Ordering::Relaxed) {
            info!("quit requested after {frames} frames");
            break StopReason::Quit;
        }
        if max_frames.is_some_and(|max| frames >= max) {
            info!("frame budget of {frames} reached");
            break StopReason::FrameBudget;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break StopReason::EndOfStream,
            Err(err) => {
                warn!("frame read failed, ending stream: {err}");
                break StopReason::ReadError;
            }
        };
        let annotations = session.process_frame(&frame.view());
        sink.submit(&annotations);
        frames += 1;
    };
    info!("loop stopped ({reason:?}) after {frames} frames");
    LoopSummary { frames, reason }
}

/// Set `quit` once `budget` has elapsed, from a background thread.
///
/// The loop notices at its next iteration; a frame in flight is finished.
pub fn quit_after(quit: Arc<AtomicBool>, budget: Duration) -> JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(budget);
        debug!("time budget of {budget:?} spent, requesting quit");
        quit.store(true, Ordering::Relaxed);
    })
}
