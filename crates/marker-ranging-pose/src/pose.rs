//! Planar square PnP.
//!
//! The marker is modeled as the square `(0,0,0), (s,0,0), (s,s,0), (0,s,0)`
//! in its own frame, in the same order as the detector's corners. A pose
//! maps marker coordinates to camera coordinates: `p_cam = R * p + t`.
//!
//! Solve:
//! 1. undistort the corners to normalized image coordinates,
//! 2. fit the plane-to-image homography `H ~ [r1 r2 t]`,
//! 3. decompose it, project `[r1 r2 r1xr2]` onto SO(3), keep `t.z > 0`,
//! 4. polish rotation vector and translation with a fixed-budget
//!    Levenberg-Marquardt on the pixel reprojection error.

use log::warn;
use marker_ranging_aruco::MarkerDetection;
use marker_ranging_core::{homography_from_4pt_f64, CameraModel, Homography};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Default physical marker side, in meters.
pub const DEFAULT_MARKER_SIZE_M: f64 = 0.035;

type Params6 = SVector<f64, 6>;
type Residuals8 = SVector<f64, 8>;
type Jacobian8x6 = SMatrix<f64, 8, 6>;

/// Errors from the pose solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("marker side length must be positive and finite, got {0}")]
    InvalidMarkerSize(f64),
    #[error("corner {0} is not finite")]
    NonFiniteCorner(usize),
    #[error("corner {0} cannot be undistorted with this camera model")]
    Undistortion(usize),
    #[error("marker corners are degenerate (collinear or coincident)")]
    DegenerateCorners,
    #[error("marker would lie behind the camera")]
    BehindCamera,
    #[error("pose refinement produced a non-finite pose")]
    NonFinitePose,
}

/// Levenberg-Marquardt settings for the pose polish.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoseSolverParams {
    /// Outer iterations; `0` keeps the linear estimate.
    pub max_iterations: usize,
    /// Initial Marquardt damping, relative to the diagonal of `J^T J`.
    pub initial_damping: f64,
    /// Stop when the parameter update norm falls below this.
    pub min_step: f64,
}

impl Default for PoseSolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            initial_damping: 1e-3,
            min_step: 1e-10,
        }
    }
}

/// Pose of one marker relative to the camera.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerPose {
    pub id: u32,
    /// Marker-to-camera rotation.
    pub rotation: Rotation3<f64>,
    /// Marker origin (its top-left corner) in camera coordinates, in the
    /// units of the marker side length.
    pub translation: Vector3<f64>,
    /// RMS corner reprojection error, in pixels.
    pub reprojection_rmse_px: f64,
}

impl MarkerPose {
    /// Rodrigues rotation vector (axis times angle, radians).
    pub fn rvec(&self) -> Vector3<f64> {
        rotation_vector(&self.rotation)
    }

    /// Euclidean distance between the two marker origins.
    pub fn distance_to(&self, other: &MarkerPose) -> f64 {
        (self.translation - other.translation).norm()
    }
}

/// Object-frame corners of a square marker with side `side`.
pub fn marker_object_points(side: f64) -> [Point3<f64>; 4] {
    [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(side, 0.0, 0.0),
        Point3::new(side, side, 0.0),
        Point3::new(0.0, side, 0.0),
    ]
}

/// Solve the pose of a square of side `side` seen at pixel `corners`.
///
/// Returns the rotation, translation and RMS reprojection error in pixels.
pub fn solve_square_pnp(
    camera: &CameraModel,
    corners: &[Point2<f64>; 4],
    side: f64,
    params: &PoseSolverParams,
) -> Result<(Rotation3<f64>, Vector3<f64>, f64), PoseError> {
    if !(side.is_finite() && side > 0.0) {
        return Err(PoseError::InvalidMarkerSize(side));
    }
    let mut normalized = [Point2::origin(); 4];
    for (i, c) in corners.iter().enumerate() {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return Err(PoseError::NonFiniteCorner(i));
        }
        normalized[i] = camera
            .undistort_pixel(*c)
            .ok_or(PoseError::Undistortion(i))?;
    }

    let object = marker_object_points(side);
    let plane = object.map(|p| Point2::new(p.x, p.y));
    let h = homography_from_4pt_f64(&plane, &normalized).ok_or(PoseError::DegenerateCorners)?;
    let (rotation, translation) = decompose_plane_homography(&h)?;

    let problem = ReprojectionProblem {
        camera,
        object: &object,
        observed: corners,
    };
    let x0 = pack(&rotation, &translation);
    let x = problem.refine(x0, params);
    if !x.iter().all(|v| v.is_finite()) {
        return Err(PoseError::NonFinitePose);
    }
    let (rotation, translation) = unpack(&x);
    if !(translation.z > 0.0) {
        return Err(PoseError::BehindCamera);
    }

    let rmse = problem
        .residuals(&x)
        .map(|r| (r.norm_squared() / 4.0).sqrt())
        .ok_or(PoseError::BehindCamera)?;
    Ok((rotation, translation, rmse))
}

/// Split `H ~ [r1 r2 t]` (identity intrinsics) into a rotation and a
/// translation with positive depth.
fn decompose_plane_homography(h: &Homography) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let m = h.h;
    let h1 = m.column(0).into_owned();
    let h2 = m.column(1).into_owned();
    let h3 = m.column(2).into_owned();

    let scale = 0.5 * (h1.norm() + h2.norm());
    if !(scale.is_finite() && scale > 1e-12) {
        return Err(PoseError::DegenerateCorners);
    }
    // The homography is defined up to sign; pick the one with the plane in front.
    let lambda = if h3.z < 0.0 { -1.0 / scale } else { 1.0 / scale };

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = r.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PoseError::DegenerateCorners);
    };
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        rot = u_flipped * v_t;
    }

    let t = h3 * lambda;
    if !(t.z > 0.0) {
        return Err(PoseError::BehindCamera);
    }
    // SVD output is orthonormal only up to rounding; going through the
    // quaternion renormalizes it.
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot));
    Ok((q.to_rotation_matrix(), t))
}

/// Axis-angle vector of `rotation`.
///
/// Goes through the quaternion, whose angle stays finite when rounding pushes
/// the matrix trace just past 3.
pub fn rotation_vector(rotation: &Rotation3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_rotation_matrix(rotation).scaled_axis()
}

/// Angle between two rotations, in radians.
pub fn rotation_angle_between(a: &Rotation3<f64>, b: &Rotation3<f64>) -> f64 {
    UnitQuaternion::from_rotation_matrix(a).angle_to(&UnitQuaternion::from_rotation_matrix(b))
}

fn pack(rotation: &Rotation3<f64>, translation: &Vector3<f64>) -> Params6 {
    let r = rotation_vector(rotation);
    Params6::new(r.x, r.y, r.z, translation.x, translation.y, translation.z)
}

fn unpack(x: &Params6) -> (Rotation3<f64>, Vector3<f64>) {
    (
        Rotation3::new(Vector3::new(x[0], x[1], x[2])),
        Vector3::new(x[3], x[4], x[5]),
    )
}

struct ReprojectionProblem<'a> {
    camera: &'a CameraModel,
    object: &'a [Point3<f64>; 4],
    observed: &'a [Point2<f64>; 4],
}

impl ReprojectionProblem<'_> {
    /// Projected minus observed pixels; `None` if a corner falls behind the camera.
    fn residuals(&self, x: &Params6) -> Option<Residuals8> {
        let (rot, t) = unpack(x);
        let mut r = Residuals8::zeros();
        for (i, (p, obs)) in self.object.iter().zip(self.observed).enumerate() {
            let px = self.camera.project(&(rot * p.coords + t))?;
            r[2 * i] = px.x - obs.x;
            r[2 * i + 1] = px.y - obs.y;
        }
        Some(r)
    }

    /// Central-difference Jacobian of the residuals.
    fn jacobian(&self, x: &Params6) -> Option<Jacobian8x6> {
        let mut j = Jacobian8x6::zeros();
        for k in 0..6 {
            let step = 1e-7 * x[k].abs().max(1e-2);
            let mut hi = *x;
            let mut lo = *x;
            hi[k] += step;
            lo[k] -= step;
            let d = (self.residuals(&hi)? - self.residuals(&lo)?) / (2.0 * step);
            j.set_column(k, &d);
        }
        Some(j)
    }

    fn cost(&self, x: &Params6) -> f64 {
        self.residuals(x)
            .map_or(f64::INFINITY, |r| r.norm_squared())
    }

    /// Damped Gauss-Newton with Marquardt scaling and a fixed budget.
    fn refine(&self, mut x: Params6, params: &PoseSolverParams) -> Params6 {
        let mut mu = params.initial_damping;
        let mut cost = self.cost(&x);
        if !cost.is_finite() {
            return x;
        }

        for _ in 0..params.max_iterations {
            let (Some(r), Some(j)) = (self.residuals(&x), self.jacobian(&x)) else {
                break;
            };
            let jtj = j.transpose() * j;
            let g = j.transpose() * r;

            let mut accepted = None;
            for _ in 0..8 {
                let mut damped = jtj;
                for d in 0..6 {
                    damped[(d, d)] += mu * jtj[(d, d)].max(1e-12);
                }
                let Some(delta) = damped.cholesky().map(|c| c.solve(&(-g))) else {
                    mu *= 10.0;
                    continue;
                };
                let candidate = x + delta;
                let candidate_cost = self.cost(&candidate);
                if candidate_cost < cost {
                    accepted = Some((candidate, candidate_cost, delta.norm()));
                    mu = (mu * 0.1).max(1e-12);
                    break;
                }
                mu *= 10.0;
            }

            let Some((next, next_cost, step)) = accepted else {
                break;
            };
            x = next;
            cost = next_cost;
            if step < params.min_step {
                break;
            }
        }
        x
    }
}

/// Pose estimator bound to a camera model and a marker side length.
#[derive(Clone, Debug)]
pub struct PoseEstimator {
    camera: CameraModel,
    marker_size: f64,
    params: PoseSolverParams,
}

impl PoseEstimator {
    pub fn new(
        camera: CameraModel,
        marker_size: f64,
        params: PoseSolverParams,
    ) -> Result<Self, PoseError> {
        if !(marker_size.is_finite() && marker_size > 0.0) {
            return Err(PoseError::InvalidMarkerSize(marker_size));
        }
        Ok(Self {
            camera,
            marker_size,
            params,
        })
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn marker_size(&self) -> f64 {
        self.marker_size
    }

    /// Pose of one detected marker.
    pub fn estimate(&self, detection: &MarkerDetection) -> Result<MarkerPose, PoseError> {
        let corners = detection
            .corners
            .map(|c| Point2::new(c.x as f64, c.y as f64));
        let (rotation, translation, rmse) =
            solve_square_pnp(&self.camera, &corners, self.marker_size, &self.params)?;
        Ok(MarkerPose {
            id: detection.id,
            rotation,
            translation,
            reprojection_rmse_px: rmse,
        })
    }

    /// Poses for every detection that can be solved, in detection order.
    /// Failures are logged and skipped.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(markers = detections.len()))
    )]
    pub fn estimate_all(&self, detections: &[MarkerDetection]) -> Vec<MarkerPose> {
        detections
            .iter()
            .filter_map(|det| match self.estimate(det) {
                Ok(pose) => Some(pose),
                Err(err) => {
                    warn!("marker {}: pose skipped: {err}", det.id);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project_corners(
        camera: &CameraModel,
        rot: &Rotation3<f64>,
        t: &Vector3<f64>,
        side: f64,
    ) -> [Point2<f64>; 4] {
        marker_object_points(side).map(|p| camera.project(&(rot * p.coords + t)).expect("in front"))
    }

    #[test]
    fn recovers_tilted_pose_from_exact_projection() {
        let camera = CameraModel::default();
        let rot = Rotation3::from_euler_angles(0.35, -0.2, 0.8);
        let t = Vector3::new(0.04, -0.03, 0.42);
        let corners = project_corners(&camera, &rot, &t, 0.035);

        let (r_est, t_est, rmse) =
            solve_square_pnp(&camera, &corners, 0.035, &PoseSolverParams::default())
                .expect("pose");
        assert!((t_est - t).norm() < 1e-4, "translation {t_est:?}");
        assert!(rotation_angle_between(&r_est, &rot).to_degrees() < 0.1);
        assert!(rmse < 1e-6);
    }

    #[test]
    fn linear_estimate_is_exact_without_noise() {
        let camera = CameraModel::pinhole(600.0, 600.0, 320.0, 240.0).expect("camera");
        let rot = Rotation3::from_euler_angles(-0.1, 0.25, 0.0);
        let t = Vector3::new(-0.05, 0.02, 0.6);
        let corners = project_corners(&camera, &rot, &t, 0.05);

        let params = PoseSolverParams {
            max_iterations: 0,
            ..PoseSolverParams::default()
        };
        let (_, t_est, _) = solve_square_pnp(&camera, &corners, 0.05, &params).expect("pose");
        assert_relative_eq!(t_est, t, epsilon = 1e-6);
    }

    #[test]
    fn refinement_handles_lens_distortion() {
        let camera = CameraModel::new(
            [[820.0, 0.0, 330.0], [0.0, 810.0, 236.0], [0.0, 0.0, 1.0]],
            vec![-0.21, 0.08, 0.001, -0.0015, 0.0],
        )
        .expect("camera");
        let rot = Rotation3::from_euler_angles(0.2, 0.3, -0.4);
        let t = Vector3::new(0.08, 0.05, 0.5);
        let corners = project_corners(&camera, &rot, &t, 0.035);

        let (r_est, t_est, rmse) =
            solve_square_pnp(&camera, &corners, 0.035, &PoseSolverParams::default())
                .expect("pose");
        assert!((t_est - t).norm() < 1e-3);
        assert!(rotation_angle_between(&r_est, &rot).to_degrees() < 0.1);
        assert!(rmse < 0.01);
    }

    #[test]
    fn identical_inputs_give_identical_poses() {
        let camera = CameraModel::default();
        let corners = [
            Point2::new(300.3, 200.1),
            Point2::new(352.8, 203.9),
            Point2::new(349.6, 255.2),
            Point2::new(297.1, 251.7),
        ];
        let params = PoseSolverParams::default();
        let a = solve_square_pnp(&camera, &corners, 0.035, &params).expect("pose");
        let b = solve_square_pnp(&camera, &corners, 0.035, &params).expect("pose");
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        let camera = CameraModel::default();
        let params = PoseSolverParams::default();
        let collinear = [
            Point2::new(100.0, 100.0),
            Point2::new(150.0, 100.0),
            Point2::new(200.0, 100.0),
            Point2::new(250.0, 100.0),
        ];
        assert_eq!(
            solve_square_pnp(&camera, &collinear, 0.035, &params),
            Err(PoseError::DegenerateCorners)
        );

        let mut nan = collinear;
        nan[2].y = f64::NAN;
        assert_eq!(
            solve_square_pnp(&camera, &nan, 0.035, &params),
            Err(PoseError::NonFiniteCorner(2))
        );

        assert!(matches!(
            PoseEstimator::new(camera, 0.0, params),
            Err(PoseError::InvalidMarkerSize(_))
        ));
    }

    #[test]
    fn rvec_matches_rotation() {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.5);
        let pose = MarkerPose {
            id: 0,
            rotation: rot,
            translation: Vector3::zeros(),
            reprojection_rmse_px: 0.0,
        };
        assert_relative_eq!(pose.rvec(), Vector3::new(0.0, 0.0, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn fronto_parallel_markers_always_solve() {
        let camera = CameraModel::default();
        let params = PoseSolverParams::default();
        let rot = Rotation3::identity();
        let mut cases = 0;
        for z in [0.25, 0.3, 0.5, 0.8] {
            for ix in -6..=6 {
                for iy in -4..=4 {
                    let t = Vector3::new(0.02 * ix as f64, 0.02 * iy as f64, z);
                    let corners = project_corners(&camera, &rot, &t, 0.035);
                    let (r_est, t_est, rmse) = solve_square_pnp(&camera, &corners, 0.035, &params)
                        .unwrap_or_else(|e| panic!("t = {t:?}: {e}"));
                    assert!((t_est - t).norm() < 1e-3, "t = {t:?}, got {t_est:?}");
                    let angle = rotation_angle_between(&r_est, &rot).to_degrees();
                    assert!(angle < 0.1, "t = {t:?}, angle {angle}");
                    assert!(rmse.is_finite() && rmse < 1e-3);
                    cases += 1;
                }
            }
        }
        assert_eq!(cases, 4 * 13 * 9);
    }

    #[test]
    fn identity_rotation_has_finite_rvec() {
        let camera = CameraModel::default();
        let t = Vector3::new(-0.1, -0.02, 0.3);
        let corners = project_corners(&camera, &Rotation3::identity(), &t, 0.035);
        let (r_est, t_est, _) =
            solve_square_pnp(&camera, &corners, 0.035, &PoseSolverParams::default())
                .expect("pose");
        let rvec = rotation_vector(&r_est);
        assert!(rvec.iter().all(|v| v.is_finite()));
        assert!(rvec.norm() < 1e-3);
        assert!((t_est - t).norm() < 1e-6);

        // Rounding past the unit trace must not poison the rotation vector.
        let nudged = Rotation3::from_matrix_unchecked(Matrix3::identity() * (1.0 + 2e-16));
        assert_eq!(rotation_vector(&nudged), Vector3::zeros());
    }
}
