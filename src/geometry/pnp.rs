//! Planar PnP for square tags.
//!
//! A square marker seen under perspective has two poses with similar
//! reprojection error when the tag is small or far away. Both are recovered
//! from the corner homography with the infinitesimal plane-based pose
//! decomposition (IPPE, Collins & Bartoli 2014), then refined with a damped
//! Gauss-Newton on pixel reprojection error.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Matrix6, Point2, SMatrix, Vector2, Vector3, Vector6};

use crate::frame::CameraModel;
use crate::geometry::homography::Homography;
use crate::geometry::so3::{angle_between, axis_rotation, exp_so3, project_to_so3, skew};
use crate::geometry::SE3;

/// Pixel² added to both residuals before forming the ambiguity ratio, so that
/// noise-free corners do not turn every second solution into an outlier.
pub const AMBIGUITY_NOISE_FLOOR: f64 = 1.0;

/// Two planar solutions closer than this (radians) are the same pose.
const DUPLICATE_ANGLE_RAD: f64 = 1e-3;

/// Thresholds for accepting and disambiguating pose candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpSettings {
    /// Maximum reprojection error (sum of squared corner distances, px²).
    pub max_reprojection_error: f64,
    /// Both solutions are kept while `ambiguity_ratio(best, alt)` is below this.
    pub ambiguity_ratio: f64,
    /// Gauss-Newton iterations applied to each solution.
    pub refine_iterations: usize,
}

impl Default for PnpSettings {
    fn default() -> Self {
        Self {
            max_reprojection_error: 50.0,
            ambiguity_ratio: 2.0,
            refine_iterations: 20,
        }
    }
}

/// A camera-relative tag pose hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCandidate {
    /// `T_camera_tag`.
    pub pose: SE3,
    /// Sum of squared corner distances in pixels.
    pub reprojection_error: f64,
    /// True when a second candidate exists for the same detection.
    pub ambiguous: bool,
}

/// Tag corners in the tag frame, matching the decoder's corner order.
pub fn tag_object_points(tag_size: f64) -> [Vector3<f64>; 4] {
    let s = tag_size / 2.0;
    [
        Vector3::new(-s, -s, 0.0),
        Vector3::new(s, -s, 0.0),
        Vector3::new(s, s, 0.0),
        Vector3::new(-s, s, 0.0),
    ]
}

/// Sum of squared pixel distances between projected and observed corners.
///
/// Infinite when any corner falls behind the camera.
pub fn reprojection_error(
    pose: &SE3,
    object: &[Vector3<f64>; 4],
    corners: &[Point2<f64>; 4],
    camera: &CameraModel,
) -> f64 {
    let mut err = 0.0;
    for (p, c) in object.iter().zip(corners.iter()) {
        match camera.project(&pose.transform_point(p)) {
            Some(px) => err += (px - c).norm_squared(),
            None => return f64::INFINITY,
        }
    }
    err
}

/// Ratio of alternative to best residual, with the noise floor applied.
pub fn ambiguity_ratio(best_error: f64, alternative_error: f64) -> f64 {
    (alternative_error + AMBIGUITY_NOISE_FLOOR) / (best_error + AMBIGUITY_NOISE_FLOOR)
}

/// Estimate the pose of a square tag from its four image corners.
///
/// Returns zero, one or two candidates sorted by reprojection error. Two are
/// returned only when the planar ambiguity cannot be settled from the image
/// alone; the depth resolver decides between them.
pub fn estimate_tag_pose(
    corners: &[Point2<f64>; 4],
    camera: &CameraModel,
    tag_size: f64,
    settings: &PnpSettings,
) -> Vec<PoseCandidate> {
    let Some(solutions) = planar_pose_solutions(corners, camera, tag_size) else {
        return Vec::new();
    };
    let object = tag_object_points(tag_size);

    // The ambiguity is judged on the unrefined solutions; refinement would
    // pull a flipped pose into the basin of the better one.
    let mut seeds: Vec<(SE3, f64)> = solutions
        .iter()
        .map(|pose| (*pose, reprojection_error(pose, &object, corners, camera)))
        .filter(|(_, err)| err.is_finite())
        .collect();
    seeds.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut basin = f64::INFINITY;
    if seeds.len() == 2 {
        let separation =
            angle_between(&seeds[0].0.rotation_matrix(), &seeds[1].0.rotation_matrix());
        if separation < DUPLICATE_ANGLE_RAD
            || ambiguity_ratio(seeds[0].1, seeds[1].1) >= settings.ambiguity_ratio
        {
            seeds.truncate(1);
        } else {
            basin = 0.5 * separation;
        }
    }

    let mut refined: Vec<(SE3, f64)> = seeds
        .iter()
        .map(|(pose, _)| {
            refine_pose(pose, &object, corners, camera, settings.refine_iterations, basin)
        })
        .filter(|(_, err)| *err <= settings.max_reprojection_error)
        .collect();
    refined.sort_by(|a, b| a.1.total_cmp(&b.1));

    let ambiguous = refined.len() == 2;
    refined
        .into_iter()
        .map(|(pose, reprojection_error)| PoseCandidate {
            pose,
            reprojection_error,
            ambiguous,
        })
        .collect()
}

/// Both IPPE solutions (unrefined) for the tag, or `None` when the corner
/// quadrilateral is degenerate.
pub fn planar_pose_solutions(
    corners: &[Point2<f64>; 4],
    camera: &CameraModel,
    tag_size: f64,
) -> Option<[SE3; 2]> {
    if tag_size <= 0.0 {
        return None;
    }
    let plane = tag_object_points(tag_size).map(|p| Point2::new(p.x, p.y));
    let image = corners.map(|c| camera.normalize(&c));

    let h = Homography::from_four_points(&plane, &image)?;
    let (r1, r2) = ippe_rotations(&h.origin_image(), &h.jacobian_at_origin())?;

    let t1 = solve_translation(&r1, &plane, &image)?;
    let t2 = solve_translation(&r2, &plane, &image)?;

    Some([SE3::from_rt(r1, t1), SE3::from_rt(r2, t2)])
}

/// The two rotations consistent with the homography's first-order behavior at
/// the tag center: `v` is the center's normalized image position, `j` the
/// Jacobian of the plane-to-image mapping there.
fn ippe_rotations(v: &Vector2<f64>, j: &Matrix2<f64>) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
    // Rv turns the optical axis onto the ray through the tag center.
    let t = v.norm();
    let rv = if t < f64::EPSILON {
        Matrix3::identity()
    } else {
        let s = (v.norm_squared() + 1.0).sqrt();
        let axis = Vector3::new(-v.y, v.x, 0.0) / t;
        axis_rotation(&axis, t / s, 1.0 / s)
    };

    let to_plane = Matrix2x3::new(1.0, 0.0, -v.x, 0.0, 1.0, -v.y);
    let b = to_plane * rv.fixed_view::<3, 2>(0, 0);
    let a = b.try_inverse()? * j;

    // Largest singular value of A.
    let aat = a * a.transpose();
    let disc = ((aat[(0, 0)] - aat[(1, 1)]).powi(2) + 4.0 * aat[(0, 1)].powi(2)).sqrt();
    let gamma = (0.5 * (aat[(0, 0)] + aat[(1, 1)] + disc)).sqrt();
    if !gamma.is_finite() || gamma < f64::EPSILON {
        return None;
    }

    let r22 = a / gamma;
    let h = Matrix2::identity() - r22.transpose() * r22;
    let b0 = h[(0, 0)].max(0.0).sqrt();
    let mut b1 = h[(1, 1)].max(0.0).sqrt();
    if h[(0, 1)] < 0.0 {
        b1 = -b1;
    }

    let complete = |sign: f64| {
        let c0 = Vector3::new(r22[(0, 0)], r22[(1, 0)], sign * b0);
        let c1 = Vector3::new(r22[(0, 1)], r22[(1, 1)], sign * b1);
        let r = Matrix3::from_columns(&[c0, c1, c0.cross(&c1)]);
        project_to_so3(&(rv * r))
    };

    Some((complete(1.0), complete(-1.0)))
}

/// Least-squares translation for a fixed rotation from normalized
/// correspondences on the tag plane.
fn solve_translation(
    rotation: &Matrix3<f64>,
    plane: &[Point2<f64>; 4],
    image: &[Point2<f64>; 4],
) -> Option<Vector3<f64>> {
    let mut ata = Matrix3::zeros();
    let mut atb = Vector3::zeros();

    for (p, q) in plane.iter().zip(image.iter()) {
        let rp = rotation * Vector3::new(p.x, p.y, 0.0);
        let rows = [
            (Vector3::new(1.0, 0.0, -q.x), q.x * rp.z - rp.x),
            (Vector3::new(0.0, 1.0, -q.y), q.y * rp.z - rp.y),
        ];
        for (a, b) in rows {
            ata += a * a.transpose();
            atb += a * b;
        }
    }

    ata.try_inverse().map(|inv| inv * atb)
}

/// Levenberg-Marquardt refinement of a single pose on the four corners.
///
/// Uses a left perturbation `T <- (Exp(ω), ρ) * T`, so the camera-frame
/// point Jacobian is `[I | -[p]×]`. Steps that would rotate the pose more
/// than `max_drift` radians away from `initial` are rejected.
fn refine_pose(
    initial: &SE3,
    object: &[Vector3<f64>; 4],
    corners: &[Point2<f64>; 4],
    camera: &CameraModel,
    iterations: usize,
    max_drift: f64,
) -> (SE3, f64) {
    let seed_rotation = initial.rotation_matrix();
    let mut pose = *initial;
    let mut err = reprojection_error(&pose, object, corners, camera);
    if !err.is_finite() {
        return (pose, err);
    }

    let mut lambda = 1e-3;
    for _ in 0..iterations {
        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();

        for (p, c) in object.iter().zip(corners.iter()) {
            let pc = pose.transform_point(p);
            let inv_z = 1.0 / pc.z;
            let residual = Vector2::new(
                camera.fx * pc.x * inv_z + camera.cx - c.x,
                camera.fy * pc.y * inv_z + camera.cy - c.y,
            );
            let d_proj = Matrix2x3::new(
                camera.fx * inv_z,
                0.0,
                -camera.fx * pc.x * inv_z * inv_z,
                0.0,
                camera.fy * inv_z,
                -camera.fy * pc.y * inv_z * inv_z,
            );
            let mut d_point = SMatrix::<f64, 3, 6>::zeros();
            d_point
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&Matrix3::identity());
            d_point.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-skew(&pc)));

            let jac = d_proj * d_point;
            jtj += jac.transpose() * jac;
            jtr += jac.transpose() * residual;
        }

        if jtr.norm() < 1e-12 {
            break;
        }

        let damped = jtj + Matrix6::from_diagonal(&jtj.diagonal()) * lambda;
        let Some(delta) = damped.lu().solve(&(-jtr)) else {
            break;
        };

        let rho = Vector3::new(delta[0], delta[1], delta[2]);
        let omega = Vector3::new(delta[3], delta[4], delta[5]);
        let d_rot = exp_so3(&omega);
        let candidate = SE3::from_rt(
            d_rot * pose.rotation_matrix(),
            d_rot * pose.translation + rho,
        );
        let candidate_err = reprojection_error(&candidate, object, corners, camera);
        let in_basin = angle_between(&seed_rotation, &candidate.rotation_matrix()) <= max_drift;

        if in_basin && candidate_err < err {
            let gain = err - candidate_err;
            pose = candidate;
            err = candidate_err;
            lambda = (lambda * 0.1).max(1e-9);
            if gain < 1e-14 * (1.0 + err) {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e6 {
                break;
            }
        }
    }

    (pose, err)
}
