//! Recorded sequences for offline replay.
//!
//! Layout of a recording directory:
//!
//! ```text
//! camera.yaml        CameraInfo of the color stream
//! params.yaml        detector configuration
//! color.csv          timestamp_ns,filename   (files under color/)
//! depth.csv          timestamp_ns,filename   (16-bit PNG in mm under depth/)
//! detections.csv     timestamp_ns,id,x0,y0,x1,y1,x2,y2,x3,y3,decision_margin
//! ```
//!
//! `detections.csv` holds the decoder output captured alongside the images,
//! which stands in for the payload decoder during replay.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use nalgebra::Point2;
use serde::Deserialize;
use tracing::warn;

use crate::detection::{DecoderSettings, RawDetection, TagDecoder};
use crate::frame::{CameraInfo, ColorFrame, ImageMessage, TransportHint};

const COLOR_FRAME_ID: &str = "color_optical_frame";
const DEPTH_FRAME_ID: &str = "depth_optical_frame";

#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub timestamp_ns: u64,
    pub filename: String,
}

/// One step of a replay, in timestamp order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEvent {
    Depth(usize),
    Color(usize),
}

#[derive(Debug, Deserialize)]
struct DetectionRow {
    timestamp_ns: u64,
    id: u32,
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
    decision_margin: f32,
}

/// Decoder that returns the detections recorded for each color timestamp.
#[derive(Debug, Clone, Default)]
pub struct RecordedDecoder {
    by_timestamp: HashMap<u64, Vec<RawDetection>>,
}

impl RecordedDecoder {
    pub fn load<P: AsRef<Path>>(csv_path: P) -> Result<Self> {
        let csv_path = csv_path.as_ref();
        let mut rdr = ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(csv_path)
            .with_context(|| format!("Failed to open {}", csv_path.display()))?;

        let mut by_timestamp: HashMap<u64, Vec<RawDetection>> = HashMap::new();
        for row in rdr.deserialize() {
            let row: DetectionRow =
                row.with_context(|| format!("Malformed row in {}", csv_path.display()))?;
            let corners = [
                Point2::new(row.x0, row.y0),
                Point2::new(row.x1, row.y1),
                Point2::new(row.x2, row.y2),
                Point2::new(row.x3, row.y3),
            ];
            by_timestamp
                .entry(row.timestamp_ns)
                .or_default()
                .push(RawDetection::new(row.id, corners, row.decision_margin));
        }
        Ok(Self { by_timestamp })
    }

    pub fn len(&self) -> usize {
        self.by_timestamp.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_timestamp.is_empty()
    }
}

impl TagDecoder for RecordedDecoder {
    fn decode(&self, frame: &ColorFrame, _settings: &DecoderSettings) -> Vec<RawDetection> {
        self.by_timestamp
            .get(&frame.timestamp_ns)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Recording {
    root: PathBuf,
    pub camera_info: CameraInfo,
    pub color_entries: Vec<ImageEntry>,
    pub depth_entries: Vec<ImageEntry>,
}

impl Recording {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let color_entries = load_image_list(root.join("color.csv"))?;
        let depth_entries = load_image_list(root.join("depth.csv"))?;
        if color_entries.is_empty() {
            bail!("recording {} has no color frames", root.display());
        }
        if depth_entries.is_empty() {
            warn!("Recording has no depth frames; every cycle will lack depth");
        }

        let camera_path = root.join("camera.yaml");
        let camera_info: CameraInfo = serde_yaml::from_reader(
            File::open(&camera_path)
                .with_context(|| format!("Failed to open {}", camera_path.display()))?,
        )
        .with_context(|| format!("Failed to parse {}", camera_path.display()))?;

        Ok(Self {
            root,
            camera_info,
            color_entries,
            depth_entries,
        })
    }

    pub fn params_path(&self) -> PathBuf {
        self.root.join("params.yaml")
    }

    pub fn decoder(&self) -> Result<RecordedDecoder> {
        RecordedDecoder::load(self.root.join("detections.csv"))
    }

    /// Depth and color frames merged by timestamp; depth first on ties.
    pub fn events(&self) -> Vec<(u64, ReplayEvent)> {
        let mut events: Vec<(u64, ReplayEvent)> = self
            .depth_entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.timestamp_ns, ReplayEvent::Depth(i)))
            .chain(
                self.color_entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (e.timestamp_ns, ReplayEvent::Color(i))),
            )
            .collect();
        events.sort_by_key(|(t, e)| (*t, matches!(e, ReplayEvent::Color(_))));
        events
    }

    pub fn color_message(&self, idx: usize, hint: TransportHint) -> Result<ImageMessage> {
        let entry = self
            .color_entries
            .get(idx)
            .with_context(|| format!("No color frame at index {}", idx))?;
        let path = self.root.join("color").join(&entry.filename);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(match hint {
            TransportHint::Compressed => ImageMessage::compressed(
                entry.timestamp_ns,
                COLOR_FRAME_ID,
                &format_of(&path),
                bytes,
            ),
            TransportHint::Raw => {
                let img = image::load_from_memory(&bytes)
                    .with_context(|| format!("Failed to decode {}", path.display()))?
                    .to_rgb8();
                let (w, h) = img.dimensions();
                ImageMessage::raw(entry.timestamp_ns, COLOR_FRAME_ID, w, h, "rgb8", img.into_raw())
            }
        })
    }

    pub fn depth_message(&self, idx: usize, hint: TransportHint) -> Result<ImageMessage> {
        let entry = self
            .depth_entries
            .get(idx)
            .with_context(|| format!("No depth frame at index {}", idx))?;
        let path = self.root.join("depth").join(&entry.filename);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(match hint {
            TransportHint::Compressed => ImageMessage::compressed(
                entry.timestamp_ns,
                DEPTH_FRAME_ID,
                &format_of(&path),
                bytes,
            ),
            TransportHint::Raw => {
                let img = image::load_from_memory(&bytes)
                    .with_context(|| format!("Failed to decode {}", path.display()))?
                    .to_luma16();
                let (w, h) = img.dimensions();
                let data = img.into_raw().iter().flat_map(|v| v.to_le_bytes()).collect();
                ImageMessage::raw(entry.timestamp_ns, DEPTH_FRAME_ID, w, h, "16UC1", data)
            }
        })
    }
}

fn format_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_ascii_lowercase()
}

fn load_image_list(csv_path: PathBuf) -> Result<Vec<ImageEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(&csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let ts: u64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("Bad timestamp `{}` in {}", &rec[0], csv_path.display()))?;
        entries.push(ImageEntry {
            timestamp_ns: ts,
            filename: rec[1].trim().to_string(),
        });
    }
    entries.sort_by_key(|e| e.timestamp_ns);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    use crate::frame::DepthFrame;

    fn write_recording(dir: &Path) {
        fs::create_dir_all(dir.join("color")).unwrap();
        fs::create_dir_all(dir.join("depth")).unwrap();

        RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]))
            .save(dir.join("color/000.png"))
            .unwrap();
        ImageBuffer::<Luma<u16>, _>::from_pixel(8, 6, Luma([1500u16]))
            .save(dir.join("depth/000.png"))
            .unwrap();

        fs::write(dir.join("color.csv"), "# timestamp,file\n200,000.png\n").unwrap();
        fs::write(dir.join("depth.csv"), "100,000.png\n200,000.png\n").unwrap();
        fs::write(
            dir.join("camera.yaml"),
            "width: 8\nheight: 6\nk: [5.0, 0.0, 4.0, 0.0, 5.0, 3.0, 0.0, 0.0, 1.0]\n",
        )
        .unwrap();
        fs::write(
            dir.join("detections.csv"),
            "timestamp_ns,id,x0,y0,x1,y1,x2,y2,x3,y3,decision_margin\n\
             200,4,1,1,5,1,5,5,1,5,33.5\n",
        )
        .unwrap();
    }

    #[test]
    fn test_load_recording_and_decoder() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(dir.path());

        let rec = Recording::new(dir.path()).unwrap();
        assert_eq!(rec.camera_info.width, 8);
        assert_eq!(
            rec.events(),
            vec![
                (100, ReplayEvent::Depth(0)),
                (200, ReplayEvent::Depth(1)),
                (200, ReplayEvent::Color(0)),
            ]
        );

        let depth_msg = rec.depth_message(0, TransportHint::Raw).unwrap();
        let depth = DepthFrame::from_message(&depth_msg, TransportHint::Raw).unwrap();
        assert!((depth.get(3, 3) - 1.5).abs() < 1e-6);

        let color_msg = rec.color_message(0, TransportHint::Compressed).unwrap();
        let color = ColorFrame::from_message(&color_msg, TransportHint::Compressed).unwrap();
        assert_eq!(color.rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));

        let decoder = rec.decoder().unwrap();
        let found = decoder.decode(&color, &DecoderSettings::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 4);
        assert_eq!(found[0].corners[2], Point2::new(5.0, 5.0));
    }
}
