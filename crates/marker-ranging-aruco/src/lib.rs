//! ArUco dictionaries and a square-marker detector.
//!
//! The detector works on grayscale frames:
//! - adaptive thresholding at several window sizes,
//! - 8-connected blobs reduced to convex quadrilaterals,
//! - sub-pixel corner refinement,
//! - bit readout through a homography and matching against a dictionary,
//!   tolerant to in-plane rotation.
//!
//! Detections carry the four outer corners in the marker's own order
//! (top-left first), so downstream pose estimation can use a fixed object
//! model.
//!
//! ```no_run
//! use marker_ranging_aruco::{DetectorParams, MarkerDetector};
//! use marker_ranging_core::GrayImage;
//!
//! let detector = MarkerDetector::with_dictionary_name("DICT_4X4_50", DetectorParams::default())
//!     .expect("builtin dictionary");
//! let frame = GrayImage::filled(640, 480, 255);
//! for marker in detector.detect(&frame.view()) {
//!     println!("id {} at {:?}", marker.id, marker.pixel_center());
//! }
//! ```

pub mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quad;
mod refine;
pub mod synthetic;
mod threshold;

pub use builtins::{builtin_dictionary, BUILTIN_DICTIONARY_NAMES, DICT_4X4_100, DICT_4X4_50};
pub use detector::{DetectorError, DetectorParams, MarkerDetection, MarkerDetector};
pub use dictionary::Dictionary;
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use refine::{refine_corner, SubpixParams};
