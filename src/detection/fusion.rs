//! Depth-assisted pose verification.
//!
//! Each pose candidate predicts where the tag lies in the depth image and how
//! far away it is. The depth samples under that footprint give an independent
//! range measurement; the candidate whose range agrees best with it wins, and
//! the measured range decides whether the tag is inside the valid band at all.

use std::fmt;

use nalgebra::Point2;
use thiserror::Error;

use crate::frame::{CameraModel, DepthFrame};
use crate::geometry::{PoseCandidate, SE3, tag_object_points};

/// Discrepancies closer than this (meters) count as a tie.
const DISCREPANCY_TIE_M: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSettings {
    /// Minimum fraction of footprint pixels that must carry a valid depth.
    pub min_depth_coverage: f64,
    /// Rescale the accepted translation to the depth-derived range.
    pub depth_scale_correction: bool,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            min_depth_coverage: 0.5,
            depth_scale_correction: false,
        }
    }
}

/// Inclusive band of accepted depth-derived ranges, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeGate {
    pub min: f64,
    pub max: f64,
}

impl RangeGate {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, range: f64) -> bool {
        self.min <= range && range <= self.max
    }
}

/// Depth statistics under a projected tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthFootprint {
    /// Depth pixels whose centers fall inside the projected quadrilateral.
    pub inside: usize,
    /// Of those, samples carrying a valid depth.
    pub valid: usize,
    /// Median valid depth (z), NaN when no sample is valid.
    pub median_depth: f64,
    /// Median depth converted to range along the tag-center ray.
    pub range: f64,
}

impl DepthFootprint {
    pub fn coverage(&self) -> f64 {
        if self.inside == 0 {
            0.0
        } else {
            self.valid as f64 / self.inside as f64
        }
    }
}

/// Why depth could not confirm a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthFailure {
    /// The footprint covers no depth pixel (off-image or sub-pixel).
    NoFootprint,
    InsufficientCoverage { coverage: f64, required: f64 },
    OutOfRange { range: f64, min: f64, max: f64 },
}

impl fmt::Display for DepthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFootprint => write!(f, "tag footprint outside the depth image"),
            Self::InsufficientCoverage { coverage, required } => {
                write!(f, "depth coverage {coverage:.2} below {required:.2}")
            }
            Self::OutOfRange { range, min, max } => {
                write!(f, "depth range {range:.3} m outside [{min}, {max}]")
            }
        }
    }
}

/// Per-tag outcome that drops a detection. Logged, never surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TagRejection {
    #[error("no pose candidate within reprojection bounds")]
    PoseUnresolvable,
    #[error("depth verification failed: {0}")]
    DepthVerificationFailed(DepthFailure),
}

/// The candidate accepted by depth, with the evidence that accepted it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedPose {
    pub pose: SE3,
    pub reprojection_error: f64,
    pub depth_range: f64,
    pub depth_coverage: f64,
    /// |candidate range - depth range| before any scale correction.
    pub discrepancy: f64,
}

/// Project the tag into the depth image and collect depth statistics.
///
/// `camera` describes the color grid; it is rescaled when the depth grid has a
/// different resolution. Returns `None` when the tag does not project or no
/// depth pixel center lies inside it.
pub fn sample_footprint(
    pose: &SE3,
    tag_size: f64,
    depth: &DepthFrame,
    camera: &CameraModel,
) -> Option<DepthFootprint> {
    let cam = camera.scaled_to(depth.width, depth.height);

    let mut quad = [Point2::origin(); 4];
    for (q, p) in quad.iter_mut().zip(tag_object_points(tag_size).iter()) {
        *q = cam.project(&pose.transform_point(p))?;
    }
    let center = cam.project(&pose.translation)?;

    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for q in &quad {
        x0 = x0.min(q.x);
        y0 = y0.min(q.y);
        x1 = x1.max(q.x);
        y1 = y1.max(q.y);
    }
    let x0 = x0.ceil().max(0.0) as i64;
    let y0 = y0.ceil().max(0.0) as i64;
    let x1 = x1.floor().min(depth.width as f64 - 1.0) as i64;
    let y1 = y1.floor().min(depth.height as f64 - 1.0) as i64;

    let mut inside = 0;
    let mut samples = Vec::new();
    for y in y0..=y1 {
        for x in x0..=x1 {
            if !in_convex_quad(&quad, &Point2::new(x as f64, y as f64)) {
                continue;
            }
            inside += 1;
            let d = depth.get(x, y);
            if !d.is_nan() {
                samples.push(d as f64);
            }
        }
    }
    if inside == 0 {
        return None;
    }

    let median_depth = median(&mut samples);
    Some(DepthFootprint {
        inside,
        valid: samples.len(),
        median_depth,
        range: median_depth * cam.ray(&center).norm(),
    })
}

/// Pick the candidate that depth agrees with and apply the range gate.
///
/// With two candidates the one whose range is closer to the depth-derived
/// range wins, ties going to the smaller reprojection error. A candidate whose
/// footprint lacks depth coverage cannot win.
pub fn resolve(
    candidates: &[PoseCandidate],
    depth: &DepthFrame,
    camera: &CameraModel,
    tag_size: f64,
    gate: &RangeGate,
    settings: &FusionSettings,
) -> Result<FusedPose, TagRejection> {
    if candidates.is_empty() {
        return Err(TagRejection::PoseUnresolvable);
    }

    let mut best: Option<FusedPose> = None;
    let mut first_failure = None;

    for candidate in candidates {
        let verified = verify(candidate, depth, camera, tag_size, settings);
        let fused = match verified {
            Ok(fused) => fused,
            Err(failure) => {
                first_failure.get_or_insert(failure);
                continue;
            }
        };

        let better = match &best {
            None => true,
            Some(current) => {
                let diff = fused.discrepancy - current.discrepancy;
                if diff.abs() <= DISCREPANCY_TIE_M {
                    fused.reprojection_error < current.reprojection_error
                } else {
                    diff < 0.0
                }
            }
        };
        if better {
            best = Some(fused);
        }
    }

    let Some(mut fused) = best else {
        let failure = first_failure.unwrap_or(DepthFailure::NoFootprint);
        return Err(TagRejection::DepthVerificationFailed(failure));
    };

    if !gate.contains(fused.depth_range) {
        return Err(TagRejection::DepthVerificationFailed(DepthFailure::OutOfRange {
            range: fused.depth_range,
            min: gate.min,
            max: gate.max,
        }));
    }

    if settings.depth_scale_correction {
        let range = fused.pose.range();
        if range > f64::EPSILON {
            fused.pose.translation *= fused.depth_range / range;
        }
    }

    Ok(fused)
}

fn verify(
    candidate: &PoseCandidate,
    depth: &DepthFrame,
    camera: &CameraModel,
    tag_size: f64,
    settings: &FusionSettings,
) -> Result<FusedPose, DepthFailure> {
    let footprint = sample_footprint(&candidate.pose, tag_size, depth, camera)
        .ok_or(DepthFailure::NoFootprint)?;

    let coverage = footprint.coverage();
    if footprint.valid == 0 || coverage < settings.min_depth_coverage {
        return Err(DepthFailure::InsufficientCoverage {
            coverage,
            required: settings.min_depth_coverage,
        });
    }

    Ok(FusedPose {
        pose: candidate.pose,
        reprojection_error: candidate.reprojection_error,
        depth_range: footprint.range,
        depth_coverage: coverage,
        discrepancy: (candidate.pose.range() - footprint.range).abs(),
    })
}

/// Point-in-polygon for a convex quad of either winding; edges count as inside.
fn in_convex_quad(quad: &[Point2<f64>; 4], p: &Point2<f64>) -> bool {
    let mut sign = 0.0;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
