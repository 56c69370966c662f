//! Plane-to-image homography from four correspondences.

use nalgebra::{Matrix2, Matrix3, Point2, SMatrix, SVector, Vector2};

/// Homography `H` mapping plane points `(x, y, 1)` to image points up to scale,
/// normalized so that `H[(2, 2)] = 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// Solve the exact homography through four point pairs (DLT with h33 = 1).
    ///
    /// Returns `None` for degenerate configurations (three collinear points
    /// or a homography that sends the plane origin to infinity).
    pub fn from_four_points(plane: &[Point2<f64>; 4], image: &[Point2<f64>; 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let (x, y) = (plane[i].x, plane[i].y);
            let (u, v) = (image[i].x, image[i].y);
            let r0 = 2 * i;
            let r1 = r0 + 1;

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -x * u;
            a[(r0, 7)] = -y * u;
            b[r0] = u;

            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -x * v;
            a[(r1, 7)] = -y * v;
            b[r1] = v;
        }

        let h = a.lu().solve(&b)?;
        if h.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(Self(Matrix3::new(
            h[0], h[1], h[2], //
            h[3], h[4], h[5], //
            h[6], h[7], 1.0,
        )))
    }

    /// Map a plane point into the image.
    pub fn apply(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        let q = self.0 * p.to_homogeneous();
        if q.z.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2::new(q.x / q.z, q.y / q.z))
    }

    /// Image of the plane origin.
    pub fn origin_image(&self) -> Vector2<f64> {
        Vector2::new(self.0[(0, 2)], self.0[(1, 2)])
    }

    /// Jacobian of the plane-to-image mapping evaluated at the plane origin.
    pub fn jacobian_at_origin(&self) -> Matrix2<f64> {
        let h = &self.0;
        Matrix2::new(
            h[(0, 0)] - h[(2, 0)] * h[(0, 2)],
            h[(0, 1)] - h[(2, 1)] * h[(0, 2)],
            h[(1, 0)] - h[(2, 0)] * h[(1, 2)],
            h[(1, 1)] - h[(2, 1)] * h[(1, 2)],
        )
    }
}
