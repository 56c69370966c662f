use image::DynamicImage;

use super::FrameDecodeError;
use super::message::{ImageMessage, ImagePayload, RawImage, TransportHint};

/// Millimeters to meters for integer depth encodings.
const MM_TO_M: f32 = 1e-3;

/// Per-pixel depth in meters, row-major. Invalid samples are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    data: Vec<f32>,
}

impl DepthFrame {
    pub fn new(
        timestamp_ns: u64,
        width: u32,
        height: u32,
        data: Vec<f32>,
    ) -> Result<Self, FrameDecodeError> {
        if width == 0 || height == 0 {
            return Err(FrameDecodeError::EmptyImage { width, height });
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameDecodeError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        // Zero, negative and infinite readings all mean "no return".
        let data = data
            .into_iter()
            .map(|d| if d.is_finite() && d > 0.0 { d } else { f32::NAN })
            .collect();
        Ok(Self {
            timestamp_ns,
            width,
            height,
            data,
        })
    }

    /// Constant-depth frame. A non-positive depth yields an all-invalid frame.
    pub fn uniform(timestamp_ns: u64, width: u32, height: u32, depth_m: f32) -> Self {
        let v = if depth_m.is_finite() && depth_m > 0.0 { depth_m } else { f32::NAN };
        Self {
            timestamp_ns,
            width,
            height,
            data: vec![v; width as usize * height as usize],
        }
    }

    /// Decode a depth message: `32FC1` in meters, `16UC1`/`mono16` in
    /// millimeters. Compressed payloads must decode to 16-bit single-channel
    /// millimeters.
    pub fn from_message(msg: &ImageMessage, hint: TransportHint) -> Result<Self, FrameDecodeError> {
        msg.expect_transport(hint)?;

        match &msg.payload {
            ImagePayload::Raw(raw) => Self::from_raw(msg.timestamp_ns, raw),
            ImagePayload::Compressed { format, data } => {
                let DynamicImage::ImageLuma16(img) = image::load_from_memory(data)? else {
                    return Err(FrameDecodeError::UnsupportedEncoding(format!(
                        "{format} depth that is not 16-bit single channel"
                    )));
                };
                let (w, h) = img.dimensions();
                let meters = img.into_raw().into_iter().map(mm_to_m).collect();
                Self::new(msg.timestamp_ns, w, h, meters)
            }
        }
    }

    fn from_raw(timestamp_ns: u64, raw: &RawImage) -> Result<Self, FrameDecodeError> {
        let packed = raw.packed()?;
        let meters: Vec<f32> = match raw.encoding.as_str() {
            "32FC1" => packed
                .chunks_exact(4)
                .map(|b| {
                    let b = [b[0], b[1], b[2], b[3]];
                    if raw.is_bigendian {
                        f32::from_be_bytes(b)
                    } else {
                        f32::from_le_bytes(b)
                    }
                })
                .collect(),
            "16UC1" | "mono16" => RawImage::u16_samples(&packed, raw.is_bigendian)
                .into_iter()
                .map(mm_to_m)
                .collect(),
            other => return Err(FrameDecodeError::UnsupportedEncoding(other.to_string())),
        };
        Self::new(timestamp_ns, raw.width, raw.height, meters)
    }

    /// Depth at integer pixel `(x, y)`, NaN when invalid or out of bounds.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return f32::NAN;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Overwrite one sample, mapping non-positive values to invalid.
    pub fn set(&mut self, x: u32, y: u32, depth_m: f32) {
        if x < self.width && y < self.height {
            let v = if depth_m.is_finite() && depth_m > 0.0 { depth_m } else { f32::NAN };
            self.data[y as usize * self.width as usize + x as usize] = v;
        }
    }
}

fn mm_to_m(v: u16) -> f32 {
    if v == 0 { f32::NAN } else { v as f32 * MM_TO_M }
}
