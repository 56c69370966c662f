//! Pinhole camera model for rectified images.

use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use super::FrameDecodeError;

/// Calibration delivered alongside each color frame.
///
/// Mirrors the usual camera-info layout: `k` is the row-major 3x3 intrinsic
/// matrix and `p` the optional row-major 3x4 projection matrix of the
/// rectified stream. When `p` is present it takes precedence, since frames are
/// already rectified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub width: u32,
    pub height: u32,
    pub k: [f64; 9],
    #[serde(default)]
    pub p: Option<[f64; 12]>,
}

impl CameraInfo {
    /// Camera info for an ideal pinhole camera.
    pub fn pinhole(width: u32, height: u32, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            width,
            height,
            k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
            p: None,
        }
    }
}

/// Pinhole intrinsics with the image size they refer to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    pub fn from_camera_info(info: &CameraInfo) -> Result<Self, FrameDecodeError> {
        let (fx, fy, cx, cy) = match info.p {
            Some(p) if p[0] > 0.0 && p[5] > 0.0 => (p[0], p[5], p[2], p[6]),
            _ => (info.k[0], info.k[4], info.k[2], info.k[5]),
        };

        let finite = [fx, fy, cx, cy].iter().all(|v| v.is_finite());
        if !finite || fx <= 0.0 || fy <= 0.0 || info.width == 0 || info.height == 0 {
            return Err(FrameDecodeError::InvalidCameraInfo { fx, fy });
        }

        Ok(Self::new(fx, fy, cx, cy, info.width, info.height))
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    #[inline]
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Viewing ray through a pixel, scaled to unit depth (z = 1).
    #[inline]
    pub fn ray(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        Vector3::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
            1.0,
        )
    }

    /// Normalized image coordinates of a pixel.
    #[inline]
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let r = self.ray(pixel);
        Point2::new(r.x, r.y)
    }

    /// The same camera observed on a resampled grid of `width` x `height`.
    ///
    /// Used when a co-registered depth stream is published at a different
    /// resolution than the color stream.
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return *self;
        }
        let sx = width as f64 / self.width as f64;
        let sy = height as f64 / self.height as f64;
        // Pixel centers sit at integer coordinates, so scale about -0.5.
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: (self.cx + 0.5) * sx - 0.5,
            cy: (self.cy + 0.5) * sy - 0.5,
            width,
            height,
        }
    }
}
