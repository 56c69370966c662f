//! Boundary to the low-level tag payload decoder.
//!
//! Finding quads and reading their bit payload is delegated. The pipeline only
//! needs ids, ordered corners and a confidence score per detection.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::frame::ColorFrame;

/// One decoded tag before pose estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub id: u32,
    /// Image corners in the decoder's fixed order (counter-clockwise in the
    /// tag frame, starting at `(-s, -s)`).
    pub corners: [Point2<f64>; 4],
    /// Decoder confidence; higher is better.
    pub decision_margin: f32,
    /// Bit errors corrected while decoding.
    pub hamming: u32,
}

impl RawDetection {
    pub fn new(id: u32, corners: [Point2<f64>; 4], decision_margin: f32) -> Self {
        Self {
            id,
            corners,
            decision_margin,
            hamming: 0,
        }
    }
}

/// Settings forwarded to the decoder with each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    pub family: String,
    /// Input downsampling factor for quad detection.
    pub decimate: f32,
    /// Gaussian blur sigma applied before segmentation.
    pub blur: f32,
    pub threads: usize,
    pub refine_edges: bool,
    /// Detections with more corrected bits are discarded by the decoder.
    pub max_hamming: u32,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            family: "tag36h11".to_string(),
            decimate: 1.0,
            blur: 0.0,
            threads: 2,
            refine_edges: true,
            max_hamming: 0,
        }
    }
}

/// Stateless decoder: grayscale frame in, raw detections out.
pub trait TagDecoder: Send + Sync {
    fn decode(&self, frame: &ColorFrame, settings: &DecoderSettings) -> Vec<RawDetection>;
}

impl<F> TagDecoder for F
where
    F: Fn(&ColorFrame, &DecoderSettings) -> Vec<RawDetection> + Send + Sync,
{
    fn decode(&self, frame: &ColorFrame, settings: &DecoderSettings) -> Vec<RawDetection> {
        self(frame, settings)
    }
}
