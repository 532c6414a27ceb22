//! # Pipeline Configuration
//!
//! One serde document drives a whole run. Every section has defaults, so
//! `{}` is a valid (if not very useful) configuration.
//!
//! ```json
//! {
//!   "dataset": { "data_folder": "tiles", "seq_len": 5, "resize_to": [64, 64] },
//!   "model": { "input_dim": 3, "hidden_dims": [32, 64, 32], "checkpoint": "convlstm.json" },
//!   "graph": { "bidirectional": true },
//!   "export": { "output_dir": "out" },
//!   "backend": { "kind": "rayon", "threads": 4 },
//!   "max_windows": 10
//! }
//! ```
//!
//! Nothing falls back to a process-wide default path: a run without
//! `export.output_dir` writes nothing, a model without `model.checkpoint`
//! is seeded from `model.seed`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{ChannelSelector, WindowSpec};
use crate::nn::{BackendKind, ConvLstmConfig};
use crate::{Error, Result};

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory of raster files, for file-backed sources.
    pub data_folder: PathBuf,
    pub extension: String,
    #[serde(flatten)]
    pub window: WindowSpec,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_folder: PathBuf::from("."),
            extension: "json".into(),
            window: WindowSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(flatten)]
    pub architecture: ConvLstmConfig,
    /// Weights to load; `None` keeps the seeded initialization.
    pub checkpoint: Option<PathBuf>,
    pub seed: u64,
    /// Tile single-channel sequences up to `input_dim` channels.
    pub repeat_channels: bool,
    /// Feed `T-1` frames and hold the last one out as the target.
    pub use_last_frame_as_target: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: ConvLstmConfig::default(),
            checkpoint: None,
            seed: 0,
            repeat_channels: true,
            use_last_frame_as_target: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub bidirectional: bool,
    /// Channel of the prediction the probability map is read from.
    pub output_channel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: Option<PathBuf>,
    pub graphml: bool,
    pub node_probabilities: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { output_dir: None, graphml: true, node_probabilities: true }
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub graph: GraphConfig,
    pub export: ExportConfig,
    pub backend: BackendKind,
    /// Stop after this many windows.
    pub max_windows: Option<usize>,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let window = &self.dataset.window;
        window.validate()?;
        self.model.architecture.validate()?;

        let input_dim = self.model.architecture.input_dim;
        if self.graph.output_channel >= input_dim {
            return Err(Error::Configuration(format!(
                "output_channel {} out of range for input_dim {input_dim}",
                self.graph.output_channel
            )));
        }
        if self.model.use_last_frame_as_target && window.seq_len < 2 {
            return Err(Error::Configuration(format!(
                "seq_len {} leaves no context frame once the target is held out",
                window.seq_len
            )));
        }
        if let ChannelSelector::Indices(idx) = &window.channels {
            let tiles = self.model.repeat_channels && idx.len() == 1;
            if idx.len() != input_dim && !tiles {
                return Err(Error::Configuration(format!(
                    "{} selected channels cannot feed input_dim {input_dim}",
                    idx.len()
                )));
            }
        }
        if self.max_windows == Some(0) {
            return Err(Error::Configuration("max_windows must be positive when set".into()));
        }
        Ok(())
    }
}
