//! Frame-level inputs: camera model, image messages, color and depth frames.

pub mod camera;
pub mod color;
pub mod depth;
pub mod message;

use thiserror::Error;

pub use camera::{CameraInfo, CameraModel};
pub use color::ColorFrame;
pub use depth::DepthFrame;
pub use message::{ImageMessage, ImagePayload, TransportHint};

/// Malformed or unsupported input on frame conversion.
///
/// Always recovered locally: the cycle (or depth update) is abandoned.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("unsupported encoding `{0}`")]
    UnsupportedEncoding(String),

    #[error("image buffer too small: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("row step {step} shorter than {row_bytes} bytes per row")]
    RowStep { step: usize, row_bytes: usize },

    #[error("empty {width}x{height} image")]
    EmptyImage { width: u32, height: u32 },

    #[error("stream expects `{expected}` transport, message is `{actual}`")]
    TransportMismatch {
        expected: TransportHint,
        actual: TransportHint,
    },

    #[error("compressed payload: {0}")]
    Compressed(#[from] image::ImageError),

    #[error("invalid camera intrinsics (fx = {fx}, fy = {fy})")]
    InvalidCameraInfo { fx: f64, fy: f64 },
}
