//! Published detection types.

use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// One accepted tag.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub id: u32,
    /// Child frame name used for transforms.
    pub frame_name: String,
    /// Physical edge length used for pose estimation (m).
    pub size: f64,
    /// `T_camera_tag`.
    pub pose: SE3,
    /// Depth-derived range that validated the pose (m).
    pub depth_range: f64,
    /// Fraction of footprint pixels with valid depth.
    pub depth_coverage: f64,
    pub reprojection_error: f64,
}

/// All results of one cycle, published as a unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionSet {
    pub timestamp_ns: u64,
    /// Camera optical frame the poses are expressed in.
    pub frame_id: String,
    pub detections: Vec<DetectionResult>,
}

impl DetectionSet {
    pub fn empty(timestamp_ns: u64, frame_id: impl Into<String>) -> Self {
        Self {
            timestamp_ns,
            frame_id: frame_id.into(),
            detections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// Flat rows for tabular output, one per detection.
    pub fn records(&self) -> impl Iterator<Item = DetectionRecord> + '_ {
        self.detections.iter().map(move |d| {
            let q = d.pose.rotation.quaternion();
            DetectionRecord {
                timestamp_ns: self.timestamp_ns,
                frame_id: self.frame_id.clone(),
                id: d.id,
                frame_name: d.frame_name.clone(),
                size: d.size,
                tx: d.pose.translation.x,
                ty: d.pose.translation.y,
                tz: d.pose.translation.z,
                qw: q.w,
                qx: q.i,
                qy: q.j,
                qz: q.k,
                depth_range: d.depth_range,
                depth_coverage: d.depth_coverage,
                reprojection_error: d.reprojection_error,
            }
        })
    }
}

/// Serialized row of a [`DetectionSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp_ns: u64,
    pub frame_id: String,
    pub id: u32,
    pub frame_name: String,
    pub size: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub depth_range: f64,
    pub depth_coverage: f64,
    pub reprojection_error: f64,
}

/// Stamped `parent -> child` transform for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagTransform {
    pub timestamp_ns: u64,
    pub parent_frame: String,
    pub child_frame: String,
    pub transform: SE3,
}

impl TagTransform {
    pub fn from_detection(set: &DetectionSet, detection: &DetectionResult) -> Self {
        Self {
            timestamp_ns: set.timestamp_ns,
            parent_frame: set.frame_id.clone(),
            child_frame: detection.frame_name.clone(),
            transform: detection.pose,
        }
    }
}
