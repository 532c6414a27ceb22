//! # firegraph: Wildfire Spread Forecasting on Pixel Graphs
//!
//! Turns a time-ordered stack of co-registered raster tiles into a
//! next-step fire probability map, then into a weighted pixel graph for
//! downstream propagation analysis.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `RasterSource` is the contract between the pipeline and raster storage
//! 2. **Clean DTOs**: `Frame`, `ProbabilityMap`, `PixelGraph` cross all boundaries
//! 3. **State owned by the pass**: recurrent state lives in the forward call, never in layers
//! 4. **Backend-agnostic inference**: `ExecutionBackend` decides how a batch is scheduled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use firegraph::{Pipeline, PipelineConfig};
//! use firegraph::raster::JsonDirSource;
//!
//! # fn example() -> firegraph::Result<()> {
//! let config = PipelineConfig::from_json_file("firegraph.json")?;
//! let source = JsonDirSource::new(&config.dataset.data_folder)?;
//! let pipeline = Pipeline::new(config, source)?;
//!
//! for window in pipeline.run()? {
//!     println!("{}: {}", window.window.index, window.stats);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Windowing | `dataset` | `[T, C, H, W]` sequences |
//! | Prediction | `nn` | `[B, L, C, H, W]` next frames |
//! | Training | `nn::train` | Updated weights, checkpoint file |
//! | Graph | `graph` | `PixelGraph`, `SparseAdjacency`, `GraphStats` |
//! | Export | `export` | GraphML, CSR, CSV, JSON, Arrow |
//! | Hotspots | `hotspot` | Active-fire cells per raster |
//!
//! ## Raster Sources
//!
//! | Source | Module | Description |
//! |--------|--------|-------------|
//! | Memory | `raster::memory` | In-memory frames for testing/embedding |
//! | JSON directory | `raster::json` | One `{shape, data}` JSON file per frame |
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `csr` (default) | Binary CSR adjacency files |
//! | `runtime` | Deadline-bounded pipeline runs on tokio |
//! | `arrow-results` | Adjacency as an Arrow `RecordBatch` |

use std::time::Duration;

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod raster;
pub mod dataset;
pub mod nn;
pub mod graph;
pub mod export;
pub mod hotspot;
pub mod config;
pub mod pipeline;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Frame, Sequence, Batch, ProbabilityMap, PixelGraph, PixelNode, PixelEdge,
    AttrValue, NodeId, Direction,
};

// ============================================================================
// Re-exports: Raster boundary
// ============================================================================

pub use raster::{RasterSource, RasterHandle, BandSelection, SourceCapabilities};

// ============================================================================
// Re-exports: Dataset, model, graph
// ============================================================================

pub use dataset::{SequenceDataset, ChannelSelector, Window};
pub use nn::{
    ConvLstm, ConvLstmConfig, ConvLstmCell, CellState, Activation,
    SharedModel, ExecutionBackend, BackendKind, Trainer, TrainConfig,
};
pub use graph::{SparseAdjacency, GraphStats, NEIGHBOR_OFFSETS};

// ============================================================================
// Re-exports: Pipeline
// ============================================================================

pub use config::PipelineConfig;
pub use pipeline::{ForecastArtifacts, Pipeline, WindowForecast};
pub use hotspot::{active_cells, HotspotSummary};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient data: {files} source files, sequence length {seq_len}")]
    InsufficientData { files: usize, seq_len: usize },

    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: String,
        expected: String,
        got: String,
    },

    #[error("Raster '{id}' unreadable: {reason}")]
    RasterUnreadable { id: String, reason: String },

    #[error("Checkpoint format error: {0}")]
    CheckpointFormat(String),

    #[error("Format unavailable: {0}")]
    FormatUnavailable(&'static str),

    #[error("Parse error in {what} at line {line}: {message}")]
    Parse {
        what: &'static str,
        line: usize,
        message: String,
    },

    #[error("Deadline of {0:?} elapsed")]
    Timeout(Duration),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "arrow-results")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl Error {
    /// Shorthand for a shape mismatch with displayable expectations.
    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        got: impl std::fmt::Debug,
    ) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected: format!("{expected:?}"),
            got: format!("{got:?}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
