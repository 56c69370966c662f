//! Detector configuration and the parameter stores it is loaded from.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::detection::{DecoderSettings, FusionSettings, RangeGate};
use crate::frame::TransportHint;
use crate::geometry::PnpSettings;

/// A tag the detector reports, with its physical size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDescription {
    pub id: u32,
    /// Edge length of the black square, in meters.
    pub size: f64,
    /// Child frame name for transforms; defaults to `tag_<id>`.
    #[serde(default)]
    pub name: Option<String>,
}

impl TagDescription {
    pub fn new(id: u32, size: f64) -> Self {
        Self { id, size, name: None }
    }

    pub fn frame_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("tag_{}", self.id))
    }
}

/// Input stream options. Read once when the node subscribes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub transport_hint: TransportHint,
    pub depth_transport_hint: TransportHint,
    /// Bounded capacity of each input queue.
    pub queue_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            transport_hint: TransportHint::Raw,
            depth_transport_hint: TransportHint::Raw,
            queue_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub standalone_tags: Vec<TagDescription>,
    pub publish_tf: bool,
    pub publish_tag_detections_image: bool,
    pub depth_min_range: f64,
    pub depth_max_range: f64,
    pub max_reprojection_error: f64,
    pub ambiguity_ratio: f64,
    pub refine_iterations: usize,
    pub min_depth_coverage: f64,
    pub depth_scale_correction: bool,
    /// Abort cycles whose depth frame is older than the color frame by more
    /// than this. Unset disables the check.
    pub max_depth_age_ms: Option<u64>,
    pub min_decision_margin: f32,
    pub decoder: DecoderSettings,
    #[serde(flatten)]
    pub streams: StreamSettings,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let pnp = PnpSettings::default();
        let fusion = FusionSettings::default();
        Self {
            standalone_tags: Vec::new(),
            publish_tf: false,
            publish_tag_detections_image: false,
            depth_min_range: 0.0,
            depth_max_range: 10.0,
            max_reprojection_error: pnp.max_reprojection_error,
            ambiguity_ratio: pnp.ambiguity_ratio,
            refine_iterations: pnp.refine_iterations,
            min_depth_coverage: fusion.min_depth_coverage,
            depth_scale_correction: fusion.depth_scale_correction,
            max_depth_age_ms: None,
            min_decision_margin: 0.0,
            decoder: DecoderSettings::default(),
            streams: StreamSettings::default(),
        }
    }
}

impl DetectorConfig {
    /// Parse a YAML document; missing keys take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse detector configuration")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.depth_min_range.is_finite() && self.depth_max_range.is_finite(),
            "depth range must be finite"
        );
        ensure!(
            self.depth_min_range <= self.depth_max_range,
            "depth_min_range ({}) exceeds depth_max_range ({})",
            self.depth_min_range,
            self.depth_max_range
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_depth_coverage),
            "min_depth_coverage must lie in [0, 1], got {}",
            self.min_depth_coverage
        );
        ensure!(
            self.max_reprojection_error > 0.0,
            "max_reprojection_error must be positive"
        );
        ensure!(self.ambiguity_ratio >= 1.0, "ambiguity_ratio must be at least 1");
        ensure!(self.streams.queue_size >= 1, "queue_size must be at least 1");

        for (i, tag) in self.standalone_tags.iter().enumerate() {
            ensure!(
                tag.size.is_finite() && tag.size > 0.0,
                "tag {} has non-positive size {}",
                tag.id,
                tag.size
            );
            ensure!(
                !self.standalone_tags[..i].iter().any(|t| t.id == tag.id),
                "tag {} is listed twice",
                tag.id
            );
        }
        Ok(())
    }

    pub fn tag(&self, id: u32) -> Option<&TagDescription> {
        self.standalone_tags.iter().find(|t| t.id == id)
    }

    pub fn pnp_settings(&self) -> PnpSettings {
        PnpSettings {
            max_reprojection_error: self.max_reprojection_error,
            ambiguity_ratio: self.ambiguity_ratio,
            refine_iterations: self.refine_iterations,
        }
    }

    pub fn fusion_settings(&self) -> FusionSettings {
        FusionSettings {
            min_depth_coverage: self.min_depth_coverage,
            depth_scale_correction: self.depth_scale_correction,
        }
    }

    pub fn range_gate(&self) -> RangeGate {
        RangeGate::new(self.depth_min_range, self.depth_max_range)
    }
}

/// Source of detector configuration, queried at construction and on refresh.
pub trait ParameterStore: Send + Sync {
    fn load(&self) -> Result<DetectorConfig>;
}

/// Load and validate in one step.
pub fn load_config(store: &dyn ParameterStore) -> Result<DetectorConfig> {
    let config = store.load()?;
    config.validate().context("Invalid detector configuration")?;
    Ok(config)
}

/// Reads a YAML file on every load, so edits are picked up on refresh.
#[derive(Debug, Clone)]
pub struct YamlParameterStore {
    path: PathBuf,
}

impl YamlParameterStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterStore for YamlParameterStore {
    fn load(&self) -> Result<DetectorConfig> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        DetectorConfig::from_yaml(&text).with_context(|| format!("in {}", self.path.display()))
    }
}

/// In-process store for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    config: RwLock<DetectorConfig>,
}

impl MemoryParameterStore {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn set(&self, config: DetectorConfig) {
        *self.config.write() = config;
    }

    pub fn update(&self, f: impl FnOnce(&mut DetectorConfig)) {
        f(&mut self.config.write());
    }
}

impl ParameterStore for MemoryParameterStore {
    fn load(&self) -> Result<DetectorConfig> {
        Ok(self.config.read().clone())
    }
}
