//! SO(3) helpers for planar pose recovery and refinement.
//!
//! Provides skew-symmetric matrix construction, the exponential map
//! (Rodrigues' formula) and projection of a near-rotation onto SO(3).

use nalgebra::{Matrix3, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map so(3) -> SO(3).
///
/// ```text
/// Exp(φ) = I + sin|φ|/|φ| [φ]× + (1 - cos|φ|)/|φ|² [φ]×²
/// ```
pub fn exp_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let k = skew(phi);

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + k + 0.5 * k * k;
    }

    let theta_sq = theta * theta;
    Matrix3::identity() + (theta.sin() / theta) * k + ((1.0 - theta.cos()) / theta_sq) * k * k
}

/// Rotation about a unit `axis` by an angle given as (sin, cos).
///
/// Used where the angle is naturally available as a ratio of lengths.
pub fn axis_rotation(axis: &Vector3<f64>, sin_theta: f64, cos_theta: f64) -> Matrix3<f64> {
    let k = skew(axis);
    Matrix3::identity() + sin_theta * k + (1.0 - cos_theta) * k * k
}

/// Closest rotation (Frobenius norm) to `m`, with det = +1 enforced.
pub fn project_to_so3(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let mut u_fixed = u;
        u_fixed.column_mut(weakest).neg_mut();
        r = u_fixed * v_t;
    }
    r
}

/// Angle of the relative rotation `a^T b`, in radians.
pub fn angle_between(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    let rel = a.transpose() * b;
    let cos_angle = ((rel.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos_angle.acos()
}
