//! Frame sources.

use std::collections::VecDeque;
use std::path::PathBuf;

use marker_ranging_core::ColorImage;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("frame source `{}` does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("no frames found in {0}")]
    NoFrames(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "image")]
    #[error("cannot decode `{}`: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Something that yields color frames, one at a time.
pub trait FrameSource {
    /// The next frame; `Ok(None)` at the end of the stream.
    fn next_frame(&mut self) -> Result<Option<ColorImage>, CaptureError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Frames held in memory, handed out in order.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    frames: VecDeque<ColorImage>,
}

impl InMemorySource {
    pub fn new(frames: impl IntoIterator<Item = ColorImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for InMemorySource {
    fn next_frame(&mut self) -> Result<Option<ColorImage>, CaptureError> {
        Ok(self.frames.pop_front())
    }

    fn describe(&self) -> String {
        format!("{} in-memory frames", self.frames.len())
    }
}

#[cfg(feature = "image")]
pub use sequence::ImageSequenceSource;

#[cfg(feature = "image")]
mod sequence {
    use std::fs;
    use std::path::{Path, PathBuf};

    use log::debug;
    use marker_ranging_core::{ChannelOrder, ColorImage};

    use super::{CaptureError, FrameSource};

    const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    }

    fn decode(path: &Path) -> Result<ColorImage, CaptureError> {
        let img = image::open(path).map_err(|source| CaptureError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let rgb = img.to_rgb8();
        Ok(ColorImage {
            width: rgb.width() as usize,
            height: rgb.height() as usize,
            order: ChannelOrder::Rgb,
            data: rgb.into_raw(),
        })
    }

    /// Still images played back as a video stream.
    ///
    /// Inputs may be files or directories; directories contribute their image
    /// files in name order. The first frame is decoded when the source is
    /// opened, so an unusable input fails up front.
    #[derive(Debug)]
    pub struct ImageSequenceSource {
        paths: Vec<PathBuf>,
        next: usize,
        first: Option<ColorImage>,
    }

    impl ImageSequenceSource {
        pub fn open<P: AsRef<Path>>(inputs: &[P]) -> Result<Self, CaptureError> {
            let mut paths = Vec::new();
            for input in inputs {
                let input = input.as_ref();
                if input.is_dir() {
                    let mut listed: Vec<PathBuf> = fs::read_dir(input)?
                        .filter_map(|entry| entry.ok().map(|e| e.path()))
                        .filter(|p| p.is_file() && is_image(p))
                        .collect();
                    listed.sort();
                    debug!("{}: {} images", input.display(), listed.len());
                    paths.extend(listed);
                } else if input.is_file() {
                    paths.push(input.to_path_buf());
                } else {
                    return Err(CaptureError::NotFound(input.to_path_buf()));
                }
            }

            let Some(first_path) = paths.first() else {
                let names: Vec<String> = inputs
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect();
                return Err(CaptureError::NoFrames(names.join(", ")));
            };
            let first = decode(first_path)?;
            Ok(Self {
                paths,
                next: 1,
                first: Some(first),
            })
        }

        pub fn len(&self) -> usize {
            self.paths.len()
        }

        pub fn is_empty(&self) -> bool {
            self.paths.is_empty()
        }
    }

    impl FrameSource for ImageSequenceSource {
        fn next_frame(&mut self) -> Result<Option<ColorImage>, CaptureError> {
            if let Some(first) = self.first.take() {
                return Ok(Some(first));
            }
            let Some(path) = self.paths.get(self.next) else {
                return Ok(None);
            };
            self.next += 1;
            decode(path).map(Some)
        }

        fn describe(&self) -> String {
            format!("image sequence of {} frames", self.paths.len())
        }
    }
}

#[cfg(all(test, feature = "image"))]
mod tests {
    use super::*;

    fn write_png(path: &std::path::Path, w: u32, h: u32, v: u8) {
        image::GrayImage::from_pixel(w, h, image::Luma([v]))
            .save(path)
            .expect("save png");
    }

    #[test]
    fn directory_frames_come_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("b.png"), 4, 3, 200);
        write_png(&dir.path().join("a.png"), 2, 2, 10);
        std::fs::write(dir.path().join("notes.txt"), "skip me").expect("write");

        let mut src = ImageSequenceSource::open(&[dir.path()]).expect("open");
        assert_eq!(src.len(), 2);
        let a = src.next_frame().expect("read").expect("frame");
        assert_eq!((a.width, a.height), (2, 2));
        assert_eq!(&a.data[..3], &[10, 10, 10]);
        let b = src.next_frame().expect("read").expect("frame");
        assert_eq!((b.width, b.height), (4, 3));
        assert!(src.next_frame().expect("read").is_none());
    }

    #[test]
    fn missing_or_empty_inputs_fail_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            ImageSequenceSource::open(&[dir.path().join("nope")]),
            Err(CaptureError::NotFound(_))
        ));
        assert!(matches!(
            ImageSequenceSource::open(&[dir.path()]),
            Err(CaptureError::NoFrames(_))
        ));
    }

    #[test]
    fn corrupt_frame_mid_stream_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("0.png"), 2, 2, 0);
        std::fs::write(dir.path().join("1.png"), b"not a png").expect("write");

        let mut src = ImageSequenceSource::open(&[dir.path()]).expect("open");
        assert!(src.next_frame().expect("first").is_some());
        assert!(matches!(src.next_frame(), Err(CaptureError::Decode { .. })));
    }
}
