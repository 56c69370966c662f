use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, Rgba};

use super::message::{ImageMessage, ImagePayload, RawImage, TransportHint};
use super::FrameDecodeError;

/// A decoded color frame.
///
/// `gray` feeds the tag decoder; `rgb` is the canvas for the annotated output.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub timestamp_ns: u64,
    pub frame_id: String,
    pub gray: GrayImage,
    pub rgb: RgbImage,
}

impl ColorFrame {
    pub fn from_message(msg: &ImageMessage, hint: TransportHint) -> Result<Self, FrameDecodeError> {
        msg.expect_transport(hint)?;

        let image = match &msg.payload {
            ImagePayload::Raw(raw) => decode_raw(raw)?,
            ImagePayload::Compressed { data, .. } => image::load_from_memory(data)?,
        };

        Ok(Self::from_image(msg.timestamp_ns, msg.frame_id.clone(), image))
    }

    pub fn from_image(timestamp_ns: u64, frame_id: String, image: DynamicImage) -> Self {
        Self {
            timestamp_ns,
            frame_id,
            gray: image.to_luma8(),
            rgb: image.to_rgb8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

fn decode_raw(raw: &RawImage) -> Result<DynamicImage, FrameDecodeError> {
    let packed = raw.packed()?;
    let (w, h) = (raw.width, raw.height);
    let size_err = || FrameDecodeError::BufferSize {
        expected: packed.len(),
        actual: raw.data.len(),
    };

    let image = match raw.encoding.as_str() {
        "mono8" | "8UC1" => DynamicImage::ImageLuma8(
            GrayImage::from_raw(w, h, packed.to_vec()).ok_or_else(size_err)?,
        ),
        "mono16" | "16UC1" => {
            let samples = RawImage::u16_samples(&packed, raw.is_bigendian);
            DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, samples).ok_or_else(size_err)?,
            )
        }
        "rgb8" => DynamicImage::ImageRgb8(
            RgbImage::from_raw(w, h, packed.to_vec()).ok_or_else(size_err)?,
        ),
        "bgr8" | "8UC3" => {
            let rgb: Vec<u8> = packed
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect();
            DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, rgb).ok_or_else(size_err)?)
        }
        "rgba8" => DynamicImage::ImageRgba8(
            ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, packed.to_vec()).ok_or_else(size_err)?,
        ),
        "bgra8" | "8UC4" => {
            let rgba: Vec<u8> = packed
                .chunks_exact(4)
                .flat_map(|p| [p[2], p[1], p[0], p[3]])
                .collect();
            DynamicImage::ImageRgba8(
                ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, rgba).ok_or_else(size_err)?,
            )
        }
        other => return Err(FrameDecodeError::UnsupportedEncoding(other.to_string())),
    };

    Ok(image)
}
