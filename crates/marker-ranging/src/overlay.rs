//! Per-frame annotations and the sinks that consume them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use marker_ranging_pose::{DistancePair, MarkerPose};
use nalgebra::Point2;
use serde::Serialize;

/// One detected marker as shown on screen.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerAnnotation {
    pub id: u32,
    pub label: char,
    pub pixel_center: Point2<i32>,
    pub corners: [Point2<f32>; 4],
    /// `None` when the pose solve failed for this marker.
    pub pose: Option<MarkerPose>,
}

/// Everything an overlay needs to draw one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameAnnotations {
    pub frame_index: usize,
    pub width: usize,
    pub height: usize,
    pub markers: Vec<MarkerAnnotation>,
    pub pairs: Vec<DistancePair>,
}

impl FrameAnnotations {
    pub fn marker(&self, id: u32) -> Option<&MarkerAnnotation> {
        self.markers.iter().find(|m| m.id == id)
    }

    fn label_of(&self, id: u32) -> char {
        self.marker(id).map_or('?', |m| m.label)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Receives annotations once per processed frame.
pub trait OverlaySink {
    fn submit(&mut self, frame: &FrameAnnotations);

    /// Flush anything buffered. Called once after the loop ends.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Collects frames in memory.
impl OverlaySink for Vec<FrameAnnotations> {
    fn submit(&mut self, frame: &FrameAnnotations) {
        self.push(frame.clone());
    }
}

/// Logs one line per marker pair at `info` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl OverlaySink for LogSink {
    fn submit(&mut self, frame: &FrameAnnotations) {
        info!(
            "frame {}: {} markers, {} pairs",
            frame.frame_index,
            frame.markers.len(),
            frame.pairs.len()
        );
        for pair in &frame.pairs {
            info!(
                "  {}({}) <-> {}({}): {:.2} cm, {} px, label at ({}, {})",
                frame.label_of(pair.id_a),
                pair.id_a,
                frame.label_of(pair.id_b),
                pair.id_b,
                pair.distance_cm,
                pair.pixel_distance,
                pair.pixel_midpoint.x,
                pair.pixel_midpoint.y
            );
        }
    }
}

/// Streams one JSON object per frame (JSON Lines) to a file.
///
/// Frames are written as they arrive, so memory does not grow with the
/// stream length. A write error is kept and reported by
/// [`finish`](OverlaySink::finish); later frames are dropped.
#[derive(Debug)]
pub struct JsonReportSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: usize,
    error: Option<SinkError>,
}

impl JsonReportSink {
    /// Create (or truncate) the report file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            frames: 0,
            error: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn write_frame(&mut self, frame: &FrameAnnotations) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl OverlaySink for JsonReportSink {
    fn submit(&mut self, frame: &FrameAnnotations) {
        if self.error.is_some() {
            return;
        }
        match self.write_frame(frame) {
            Ok(()) => self.frames += 1,
            Err(err) => self.error = Some(err),
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()?;
        info!(
            "report with {} frames written to {}",
            self.frames,
            self.path.display()
        );
        Ok(())
    }
}

/// Fans out to several sinks.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn OverlaySink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl OverlaySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl OverlaySink for SinkSet {
    fn submit(&mut self, frame: &FrameAnnotations) {
        for sink in &mut self.sinks {
            sink.submit(frame);
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        // Every sink gets a chance to flush; the first error is reported.
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.finish() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
