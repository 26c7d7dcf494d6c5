//! Core types and utilities for fiducial marker ranging.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete marker detector, capture backend or image codec:
//! - lightweight gray/color image buffers and the color -> gray conversion,
//! - the normalized 4-point homography solve,
//! - the pinhole + Brown-Conrady camera model and its provider,
//! - a stderr logger tagged by workspace crate (and an optional `tracing` subscriber).

mod camera;
mod homography;
mod image;
mod logger;

pub use camera::{
    CameraModel, CameraModelError, CameraSource, LoadedCamera, DEFAULT_CAMERA_MATRIX,
    DISTORTION_COEFF_COUNT,
};
pub use homography::{homography_from_4pt, homography_from_4pt_f64, Homography};
pub use image::{
    sample_bilinear, ChannelOrder, ColorImage, ColorImageView, GrayImage, GrayImageView,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
