//! Detection overlay for the annotated image output.

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut, text_size};
use nalgebra::Point2;

const X_EDGE: Rgb<u8> = Rgb([0, 255, 0]);
const Y_EDGE: Rgb<u8> = Rgb([255, 0, 0]);
const FAR_EDGE: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL: Rgb<u8> = Rgb([0, 153, 255]);

/// Draws tag outlines and ids with the bundled label font.
#[derive(Debug, Clone)]
pub struct Annotator {
    font: FontRef<'static>,
}

impl Annotator {
    pub fn new() -> Result<Self> {
        let font = FontRef::try_from_slice(include_bytes!("../../fonts/DejaVuSansMono-Bold.ttf"))
            .context("Failed to load label font")?;
        Ok(Self { font })
    }

    /// Draw a tag outline, a marker on corner 0 and the id at the tag center.
    ///
    /// The edge leaving corner 0 toward corner 1 (tag +x) is green, the one
    /// toward corner 3 (tag +y) red, the remaining two blue.
    pub fn draw_detection(&self, canvas: &mut RgbImage, id: u32, corners: &[Point2<f64>; 4]) {
        let p = corners.map(|c| (c.x as f32, c.y as f32));

        draw_line_segment_mut(canvas, p[0], p[1], X_EDGE);
        draw_line_segment_mut(canvas, p[0], p[3], Y_EDGE);
        draw_line_segment_mut(canvas, p[1], p[2], FAR_EDGE);
        draw_line_segment_mut(canvas, p[2], p[3], FAR_EDGE);
        draw_filled_circle_mut(canvas, (p[0].0 as i32, p[0].1 as i32), 3, Y_EDGE);

        let cx = p.iter().map(|c| c.0).sum::<f32>() / 4.0;
        let cy = p.iter().map(|c| c.1).sum::<f32>() / 4.0;
        let edge = ((p[1].0 - p[0].0).powi(2) + (p[1].1 - p[0].1).powi(2)).sqrt();
        let scale = PxScale::from((edge * 0.25).clamp(12.0, 40.0));

        let label = id.to_string();
        let (w, h) = text_size(scale, &self.font, &label);
        let x = (cx - w as f32 / 2.0) as i32;
        let y = (cy - h as f32 / 2.0) as i32;
        draw_text_mut(canvas, LABEL, x, y, scale, &self.font, &label);
    }
}
