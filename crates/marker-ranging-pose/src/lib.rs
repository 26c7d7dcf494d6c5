//! Marker pose estimation and metric ranging.
//!
//! [`PoseEstimator`] turns a [`MarkerDetection`](marker_ranging_aruco::MarkerDetection)
//! into a [`MarkerPose`] with a planar square PnP solve; [`pairwise_distances`]
//! then reports the distance between every pair of solved markers.

mod distance;
mod pose;

pub use distance::{marker_label, pairwise_distances, DistancePair, CENTIMETERS_PER_METER};
pub use pose::{
    marker_object_points, rotation_angle_between, rotation_vector, solve_square_pnp, MarkerPose,
    PoseError, PoseEstimator, PoseSolverParams, DEFAULT_MARKER_SIZE_M,
};
