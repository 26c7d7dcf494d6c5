//! Pairwise metric distances between marker poses.

use std::collections::HashMap;

use log::debug;
use marker_ranging_aruco::MarkerDetection;
use nalgebra::Point2;
use serde::Serialize;

use crate::MarkerPose;

/// Translation units (meters) to reported units (centimeters).
pub const CENTIMETERS_PER_METER: f64 = 100.0;

/// Distance between two markers, reported once per unordered pair.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistancePair {
    /// Always smaller than `id_b`.
    pub id_a: u32,
    pub id_b: u32,
    /// Distance between marker origins, in centimeters.
    pub distance_cm: f64,
    /// Integer mean of the two markers' pixel centers, for label placement.
    pub pixel_midpoint: Point2<i32>,
    /// Truncated Euclidean distance between the pixel centers.
    pub pixel_distance: i32,
}

/// Overlay letter for a marker id: `'A' + id mod 26`.
pub fn marker_label(id: u32) -> char {
    char::from(b'A' + (id % 26) as u8)
}

/// Every unordered pair of `poses`, enumerated by ascending first index,
/// then second index.
///
/// Pixel centers come from the detection with the same id; poses without a
/// matching detection are left out.
pub fn pairwise_distances(
    poses: &[MarkerPose],
    detections: &[MarkerDetection],
) -> Vec<DistancePair> {
    if poses.len() < 2 {
        return Vec::new();
    }
    let centers: HashMap<u32, Point2<i32>> = detections
        .iter()
        .map(|d| (d.id, d.pixel_center()))
        .collect();

    let mut pairs = Vec::with_capacity(poses.len() * (poses.len() - 1) / 2);
    for (i, a) in poses.iter().enumerate() {
        for b in &poses[i + 1..] {
            if a.id == b.id {
                debug!("duplicate marker id {} in pose set, pair skipped", a.id);
                continue;
            }
            let (Some(&ca), Some(&cb)) = (centers.get(&a.id), centers.get(&b.id)) else {
                debug!("no detection for pair ({}, {}), skipped", a.id, b.id);
                continue;
            };
            let (first, second, c_first, c_second) = if a.id < b.id {
                (a, b, ca, cb)
            } else {
                (b, a, cb, ca)
            };
            pairs.push(DistancePair {
                id_a: first.id,
                id_b: second.id,
                distance_cm: CENTIMETERS_PER_METER * first.distance_to(second),
                pixel_midpoint: Point2::new(
                    (c_first.x + c_second.x) / 2,
                    (c_first.y + c_second.y) / 2,
                ),
                pixel_distance: pixel_distance(c_first, c_second),
            });
        }
    }
    pairs
}

fn pixel_distance(a: Point2<i32>, b: Point2<i32>) -> i32 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    dx.hypot(dy) as i32
}
