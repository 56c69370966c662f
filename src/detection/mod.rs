//! Tag detection: decoder boundary, depth fusion, results and overlays.

pub mod annotate;
pub mod decoder;
pub mod fusion;
pub mod result;

pub use decoder::{DecoderSettings, RawDetection, TagDecoder};
pub use fusion::{
    DepthFailure, DepthFootprint, FusedPose, FusionSettings, RangeGate, TagRejection, resolve,
    sample_footprint,
};
pub use result::{DetectionRecord, DetectionResult, DetectionSet, TagTransform};
