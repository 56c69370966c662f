//! Image messages as delivered by the sensor transport.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use super::FrameDecodeError;

/// Payload kind a stream is subscribed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportHint {
    #[default]
    Raw,
    Compressed,
}

impl fmt::Display for TransportHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Compressed => f.write_str("compressed"),
        }
    }
}

impl FromStr for TransportHint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "compressed" => Ok(Self::Compressed),
            other => bail!("unknown transport hint `{other}` (expected `raw` or `compressed`)"),
        }
    }
}

/// Uncompressed pixel buffer with an explicit encoding and row stride.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub is_bigendian: bool,
    /// Bytes per row, including any padding.
    pub step: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Raw(RawImage),
    /// Encoded image file (PNG, JPEG, ...) as produced by a compressing transport.
    Compressed { format: String, data: Vec<u8> },
}

impl ImagePayload {
    pub fn transport(&self) -> TransportHint {
        match self {
            Self::Raw(_) => TransportHint::Raw,
            Self::Compressed { .. } => TransportHint::Compressed,
        }
    }
}

/// A timestamped image from one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMessage {
    pub timestamp_ns: u64,
    /// Optical frame the image is expressed in.
    pub frame_id: String,
    pub payload: ImagePayload,
}

impl ImageMessage {
    /// Tightly packed raw image (`step = width * bytes_per_pixel`).
    pub fn raw(
        timestamp_ns: u64,
        frame_id: impl Into<String>,
        width: u32,
        height: u32,
        encoding: &str,
        data: Vec<u8>,
    ) -> Self {
        let bpp = bytes_per_pixel(encoding).unwrap_or(1);
        Self {
            timestamp_ns,
            frame_id: frame_id.into(),
            payload: ImagePayload::Raw(RawImage {
                width,
                height,
                encoding: encoding.to_string(),
                is_bigendian: false,
                step: width as usize * bpp,
                data,
            }),
        }
    }

    pub fn compressed(
        timestamp_ns: u64,
        frame_id: impl Into<String>,
        format: &str,
        data: Vec<u8>,
    ) -> Self {
        Self {
            timestamp_ns,
            frame_id: frame_id.into(),
            payload: ImagePayload::Compressed {
                format: format.to_string(),
                data,
            },
        }
    }

    /// Reject payloads that do not match the stream's transport.
    pub fn expect_transport(&self, hint: TransportHint) -> Result<(), FrameDecodeError> {
        let actual = self.payload.transport();
        if actual != hint {
            return Err(FrameDecodeError::TransportMismatch {
                expected: hint,
                actual,
            });
        }
        Ok(())
    }
}

/// Bytes per pixel for the raw encodings this crate understands.
pub fn bytes_per_pixel(encoding: &str) -> Option<usize> {
    match encoding {
        "mono8" | "8UC1" => Some(1),
        "mono16" | "16UC1" => Some(2),
        "rgb8" | "bgr8" | "8UC3" => Some(3),
        "rgba8" | "bgra8" | "8UC4" | "32FC1" => Some(4),
        _ => None,
    }
}

impl RawImage {
    /// Pixel bytes with row padding removed.
    pub fn packed(&self) -> Result<Cow<'_, [u8]>, FrameDecodeError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameDecodeError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        let bpp = bytes_per_pixel(&self.encoding)
            .ok_or_else(|| FrameDecodeError::UnsupportedEncoding(self.encoding.clone()))?;
        let row_bytes = self.width as usize * bpp;
        if self.step < row_bytes {
            return Err(FrameDecodeError::RowStep {
                step: self.step,
                row_bytes,
            });
        }

        let height = self.height as usize;
        // The last row may omit its padding.
        let expected = self.step * (height - 1) + row_bytes;
        if self.data.len() < expected {
            return Err(FrameDecodeError::BufferSize {
                expected,
                actual: self.data.len(),
            });
        }

        if self.step == row_bytes {
            return Ok(Cow::Borrowed(&self.data[..row_bytes * height]));
        }
        let mut packed = Vec::with_capacity(row_bytes * height);
        for row in self.data.chunks(self.step).take(height) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        Ok(Cow::Owned(packed))
    }

    /// Decode 16-bit samples honoring the declared byte order.
    pub(crate) fn u16_samples(bytes: &[u8], big_endian: bool) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|b| {
                if big_endian {
                    u16::from_be_bytes([b[0], b[1]])
                } else {
                    u16::from_le_bytes([b[0], b[1]])
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_hint_parsing() {
        assert_eq!("raw".parse::<TransportHint>().unwrap(), TransportHint::Raw);
        assert_eq!(
            "compressed".parse::<TransportHint>().unwrap(),
            TransportHint::Compressed
        );
        assert!("theora".parse::<TransportHint>().is_err());
    }

    #[test]
    fn test_packed_strips_row_padding() {
        let raw = RawImage {
            width: 2,
            height: 2,
            encoding: "mono8".into(),
            is_bigendian: false,
            step: 4,
            data: vec![1, 2, 0, 0, 3, 4],
        };
        assert_eq!(raw.packed().unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let msg = ImageMessage::raw(0, "cam", 4, 4, "rgb8", vec![0; 10]);
        let ImagePayload::Raw(raw) = &msg.payload else {
            unreachable!()
        };
        assert!(matches!(
            raw.packed(),
            Err(FrameDecodeError::BufferSize { expected: 48, actual: 10 })
        ));
    }

    #[test]
    fn test_transport_mismatch() {
        let msg = ImageMessage::compressed(0, "cam", "png", vec![]);
        assert!(msg.expect_transport(TransportHint::Compressed).is_ok());
        assert!(matches!(
            msg.expect_transport(TransportHint::Raw),
            Err(FrameDecodeError::TransportMismatch { .. })
        ));
    }

    #[test]
    fn test_big_endian_samples() {
        assert_eq!(RawImage::u16_samples(&[0x01, 0x02], true), vec![0x0102]);
        assert_eq!(RawImage::u16_samples(&[0x01, 0x02], false), vec![0x0201]);
    }
}
