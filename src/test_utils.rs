//! Synthetic cameras, tags and depth scenes shared by unit tests.

use nalgebra::{Point2, UnitQuaternion, Vector3};

use crate::frame::{CameraModel, DepthFrame, ImageMessage};
use crate::geometry::{SE3, tag_object_points};

pub fn test_camera() -> CameraModel {
    CameraModel::new(600.0, 600.0, 320.0, 240.0, 640, 480)
}

/// `T_camera_tag` with the tag at `(x, y, z)` tilted by roll/pitch.
pub fn tag_pose(x: f64, y: f64, z: f64, roll: f64, pitch: f64) -> SE3 {
    SE3 {
        rotation: UnitQuaternion::from_euler_angles(roll, pitch, 0.0),
        translation: Vector3::new(x, y, z),
    }
}

/// Noise-free image corners of a tag.
pub fn project_tag(pose: &SE3, size: f64, camera: &CameraModel) -> [Point2<f64>; 4] {
    tag_object_points(size).map(|p| {
        camera
            .project(&pose.transform_point(&p))
            .unwrap_or(Point2::new(f64::NAN, f64::NAN))
    })
}

/// Depth image of a square tag floating in front of a flat background.
///
/// Pixels that hit the tag read the true plane depth; everything else reads
/// `background_m` (NaN when not positive).
pub fn render_tag_depth(
    timestamp_ns: u64,
    pose: &SE3,
    size: f64,
    camera: &CameraModel,
    background_m: f32,
) -> DepthFrame {
    let s = size / 2.0;
    let rot = pose.rotation_matrix();
    let normal = rot * Vector3::z();
    let mut depth = DepthFrame::uniform(timestamp_ns, camera.width, camera.height, background_m);

    for y in 0..camera.height {
        for x in 0..camera.width {
            let ray = camera.ray(&Point2::new(x as f64, y as f64));
            let denom = normal.dot(&ray);
            if denom.abs() < 1e-12 {
                continue;
            }
            let lambda = normal.dot(&pose.translation) / denom;
            if lambda <= 0.0 {
                continue;
            }
            let local = rot.transpose() * (ray * lambda - pose.translation);
            if local.x.abs() <= s && local.y.abs() <= s {
                depth.set(x, y, lambda as f32);
            } else if background_m <= 0.0 {
                depth.set(x, y, f32::NAN);
            }
        }
    }
    depth
}

/// Encode a depth frame as a `32FC1` message.
pub fn depth_message(depth: &DepthFrame) -> ImageMessage {
    let data = depth.data().iter().flat_map(|v| v.to_le_bytes()).collect();
    ImageMessage::raw(
        depth.timestamp_ns,
        "depth_optical_frame",
        depth.width,
        depth.height,
        "32FC1",
        data,
    )
}

/// Uniform gray `mono8` color message.
pub fn gray_message(timestamp_ns: u64, camera: &CameraModel) -> ImageMessage {
    let len = camera.width as usize * camera.height as usize;
    ImageMessage::raw(
        timestamp_ns,
        "color_optical_frame",
        camera.width,
        camera.height,
        "mono8",
        vec![128; len],
    )
}
