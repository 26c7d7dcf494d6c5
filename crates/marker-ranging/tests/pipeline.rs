use std::sync::atomic::AtomicBool;

use marker_ranging::aruco::synthetic::render_marker;
use marker_ranging::aruco::DICT_4X4_50;
use marker_ranging::core::{CameraModel, CameraSource, ColorImage, GrayImage, DEFAULT_CAMERA_MATRIX};
use marker_ranging::pose::marker_object_points;
use marker_ranging::{
    run_loop, FrameAnnotations, InMemorySource, RangingConfig, RangingSession, StopReason,
};
use nalgebra::{Point2, Rotation3, Vector3};

const SIDE: f64 = 0.1;

/// Render `markers` (id, marker-origin translation, facing the camera) into
/// a white 640x480 frame as the default camera would see them.
fn scene(camera: &CameraModel, markers: &[(u32, Vector3<f64>)]) -> ColorImage {
    let mut gray = GrayImage::filled(640, 480, 255);
    for &(id, t) in markers {
        let corners = marker_object_points(SIDE).map(|p| {
            camera
                .project(&(Rotation3::identity() * p.coords + t))
                .expect("in front of the camera")
        });
        assert!(render_marker(&mut gray, &DICT_4X4_50, id, corners, 1));
    }
    ColorImage::from_gray(&gray)
}

fn session() -> RangingSession {
    let config = RangingConfig {
        marker_size_m: SIDE,
        ..RangingConfig::default()
    };
    RangingSession::from_config(&config, CameraModel::default()).expect("session")
}

fn run(frames: Vec<ColorImage>) -> Vec<FrameAnnotations> {
    let mut out: Vec<FrameAnnotations> = Vec::new();
    let summary = run_loop(
        &mut session(),
        &mut InMemorySource::new(frames),
        &mut out,
        &AtomicBool::new(false),
        None,
    );
    assert_eq!(summary.reason, StopReason::EndOfStream);
    out
}

#[test]
fn markers_half_a_meter_apart_read_fifty_centimeters() {
    let camera = CameraModel::default();
    let frame = scene(
        &camera,
        &[
            (9, Vector3::new(-0.30, -0.05, 0.9)),
            (4, Vector3::new(0.20, -0.05, 0.9)),
        ],
    );
    let out = run(vec![frame]);
    assert_eq!(out.len(), 1);
    let ann = &out[0];

    let ids: Vec<u32> = ann.markers.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![9, 4]);
    assert!(ann.markers.iter().all(|m| m.pose.is_some()));
    assert_eq!(ann.marker(9).map(|m| m.label), Some('J'));
    assert_eq!(ann.marker(4).map(|m| m.label), Some('E'));

    assert_eq!(ann.pairs.len(), 1);
    let pair = &ann.pairs[0];
    assert_eq!((pair.id_a, pair.id_b), (4, 9));
    assert!(
        (pair.distance_cm - 50.0).abs() < 0.5,
        "distance {:.3} cm",
        pair.distance_cm
    );

    let a = ann.marker(4).expect("marker 4").pixel_center;
    let b = ann.marker(9).expect("marker 9").pixel_center;
    assert_eq!(
        pair.pixel_midpoint,
        Point2::new((a.x + b.x) / 2, (a.y + b.y) / 2)
    );
    assert!((pair.pixel_distance - (b.x - a.x).abs()).abs() <= 1);
}

#[test]
fn single_marker_gives_one_pose_and_no_pairs() {
    let camera = CameraModel::default();
    let frame = scene(&camera, &[(17, Vector3::new(-0.05, -0.05, 0.7))]);
    let out = run(vec![frame]);
    assert_eq!(out[0].markers.len(), 1);
    let pose = out[0].markers[0].pose.as_ref().expect("pose");
    assert!((pose.translation - Vector3::new(-0.05, -0.05, 0.7)).norm() < 5e-3);
    assert!(out[0].pairs.is_empty());
}

#[test]
fn empty_and_blank_frames_are_survivable() {
    let out = run(vec![
        ColorImage::default(),
        ColorImage::from_gray(&GrayImage::filled(320, 240, 128)),
    ]);
    assert_eq!(out.len(), 2);
    for ann in &out {
        assert!(ann.markers.is_empty());
        assert!(ann.pairs.is_empty());
    }
    assert_eq!((out[0].width, out[0].height), (0, 0));
}

#[test]
fn missing_calibration_falls_back_to_default_camera() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loaded = CameraModel::load(dir.path().join("camera_params.json"));
    assert_eq!(loaded.source, CameraSource::Default);
    assert_eq!(loaded.model.matrix(), DEFAULT_CAMERA_MATRIX);
    assert!(loaded.model.distortion().iter().all(|&k| k == 0.0));
}

#[test]
fn quit_flag_stops_before_reading() {
    let mut out: Vec<FrameAnnotations> = Vec::new();
    let mut source = InMemorySource::new(vec![ColorImage::default()]);
    let summary = run_loop(
        &mut session(),
        &mut source,
        &mut out,
        &AtomicBool::new(true),
        None,
    );
    assert_eq!(summary.reason, StopReason::Quit);
    assert_eq!(source.remaining(), 1);
    assert!(out.is_empty());
}
