//! # Forecast Pipeline
//!
//! ```text
//! RasterSource ──► SequenceDataset ──► window ──► [repeat channels]
//!   ──► context / target split ──► ExecutionBackend::run(SharedModel)
//!   ──► ProbabilityMap ──► PixelGraph ──► SparseAdjacency + GraphStats
//!   ──► (output_dir) adjacency_seq_N.csr | node_probs_seq_N.json
//!                    pixel_graph_sequence_N.graphml
//! ```
//!
//! Windows are processed one at a time, in order. `N` in file names is the
//! 1-based window number.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Axis;

use crate::config::PipelineConfig;
use crate::dataset::{repeat_channels, split_context_target, SequenceDataset, Window};
use crate::export::{save_adjacency, save_graphml, save_node_probabilities, SavedAdjacency};
use crate::graph::{transform, GraphStats, SparseAdjacency};
use crate::model::{PixelGraph, ProbabilityMap};
use crate::nn::{mse, ConvLstm, ExecutionBackend, SharedModel, TrainConfig, TrainReport, Trainer};
use crate::raster::{JsonDirSource, RasterSource};
use crate::{Error, Result};

/// Files written for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastArtifacts {
    pub adjacency: SavedAdjacency,
    pub node_probabilities: Option<PathBuf>,
    pub graphml: Option<PathBuf>,
}

/// Everything produced for one window.
#[derive(Debug, Clone)]
pub struct WindowForecast {
    pub window: Window,
    pub probability_map: ProbabilityMap,
    pub graph: PixelGraph,
    pub adjacency: SparseAdjacency,
    pub stats: GraphStats,
    /// MSE of the first predicted frame against the held-out frame.
    pub target_loss: Option<f32>,
    pub artifacts: Option<ForecastArtifacts>,
}

pub struct Pipeline<S: RasterSource> {
    config: PipelineConfig,
    dataset: SequenceDataset<S>,
    model: SharedModel,
    backend: Box<dyn ExecutionBackend>,
}

impl Pipeline<JsonDirSource> {
    /// Pipeline over `dataset.data_folder` with the configured extension.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let source = JsonDirSource::new(&config.dataset.data_folder)?
            .with_extension(config.dataset.extension.clone());
        Self::new(config, source)
    }
}

impl<S: RasterSource> Pipeline<S> {
    pub fn new(config: PipelineConfig, source: S) -> Result<Self> {
        config.validate()?;
        let dataset = SequenceDataset::new(source, config.dataset.window.clone())?;
        dataset.ensure_non_empty()?;

        let model = SharedModel::new(ConvLstm::new(config.model.architecture.clone(), config.model.seed)?);
        if let Some(path) = &config.model.checkpoint {
            model.load_checkpoint(path)?;
        }
        let backend = config.backend.build()?;

        tracing::info!(
            windows = dataset.len(),
            backend = backend.name(),
            checkpoint = config.model.checkpoint.is_some(),
            "pipeline ready"
        );
        Ok(Self { config, dataset, model, backend })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dataset(&self) -> &SequenceDataset<S> {
        &self.dataset
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    /// Number of windows `run` will process.
    pub fn window_count(&self) -> usize {
        match self.config.max_windows {
            Some(max) => max.min(self.dataset.len()),
            None => self.dataset.len(),
        }
    }

    pub fn run(&self) -> Result<Vec<WindowForecast>> {
        self.run_until(&AtomicBool::new(false))
    }

    /// Like `run`, but stops before the next window once `cancel` is set
    /// and returns `Error::Cancelled`.
    pub fn run_until(&self, cancel: &AtomicBool) -> Result<Vec<WindowForecast>> {
        self.run_observed(cancel, |_| {})
    }

    /// `run_until` with a callback after each finished window.
    pub fn run_observed(
        &self,
        cancel: &AtomicBool,
        mut on_window: impl FnMut(&WindowForecast),
    ) -> Result<Vec<WindowForecast>> {
        let total = self.window_count();
        let mut out = Vec::with_capacity(total);
        for index in 0..total {
            if cancel.load(Ordering::Relaxed) {
                tracing::warn!(completed = index, total, "pipeline cancelled");
                return Err(Error::Cancelled);
            }
            let forecast = self.forecast_window(index)?;
            tracing::info!(window = index + 1, total, stats = %forecast.stats, "window forecast");
            on_window(&forecast);
            out.push(forecast);
        }
        Ok(out)
    }

    /// Train the pipeline's model on every window, with the same channel
    /// handling `run` applies. Later runs use the updated weights.
    pub fn train(&self, config: TrainConfig) -> Result<TrainReport> {
        let mut trainer = Trainer::new(config)?;
        let mut sequences = self.dataset.materialize_parallel()?;
        if self.config.model.repeat_channels {
            let input_dim = self.config.model.architecture.input_dim;
            sequences = sequences
                .into_iter()
                .map(|sequence| repeat_channels(sequence, input_dim))
                .collect::<Result<_>>()?;
        }
        let report = trainer.fit(&self.model, &sequences)?;
        tracing::info!(windows = sequences.len(), loss = ?report.final_loss(), "pipeline model trained");
        Ok(report)
    }

    /// Predict, build the graph for, and optionally export one window.
    pub fn forecast_window(&self, index: usize) -> Result<WindowForecast> {
        let window = self
            .dataset
            .window(index)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("window {index} out of range")))?;

        let mut sequence = self.dataset.get(index)?;
        let input_dim = self.config.model.architecture.input_dim;
        if self.config.model.repeat_channels {
            sequence = repeat_channels(sequence, input_dim)?;
        }

        let (context, target) = if self.config.model.use_last_frame_as_target {
            let (context, target) = split_context_target(&sequence)?;
            (context, Some(target))
        } else {
            (sequence, None)
        };

        let batch = context.insert_axis(Axis(0));
        let prediction = self.model.forward(self.backend.as_ref(), batch.view())?;

        let target_loss = match &target {
            Some(frame) => {
                let first = prediction.index_axis(Axis(0), 0);
                Some(mse(first.index_axis(Axis(0), 0), frame.view())?)
            }
            None => None,
        };

        let probability_map = ProbabilityMap::from_prediction(prediction.view(), 0, 0, self.config.graph.output_channel)?;
        let graph = transform(&probability_map, self.config.graph.bidirectional)?;
        let adjacency = SparseAdjacency::from_graph(&graph);
        let stats = GraphStats::from_graph(&graph);

        let artifacts = match &self.config.export.output_dir {
            Some(dir) => Some(self.export(dir, index + 1, &graph, &adjacency, &probability_map)?),
            None => None,
        };

        tracing::debug!(window = index, ids = ?window.ids, loss = ?target_loss, "window processed");
        Ok(WindowForecast { window, probability_map, graph, adjacency, stats, target_loss, artifacts })
    }

    fn export(
        &self,
        dir: &Path,
        number: usize,
        graph: &PixelGraph,
        adjacency: &SparseAdjacency,
        map: &ProbabilityMap,
    ) -> Result<ForecastArtifacts> {
        std::fs::create_dir_all(dir)?;
        let adjacency = save_adjacency(
            adjacency,
            dir.join(format!("adjacency_seq_{number}.csr")),
            dir.join(format!("adjacency_seq_{number}_edges.csv")),
        )?;

        let node_probabilities = if self.config.export.node_probabilities {
            let path = dir.join(format!("node_probs_seq_{number}.json"));
            save_node_probabilities(&map.to_flat(), &path)?;
            Some(path)
        } else {
            None
        };

        let graphml = if self.config.export.graphml {
            let path = dir.join(format!("pixel_graph_sequence_{number}.graphml"));
            save_graphml(graph, &path)?;
            Some(path)
        } else {
            None
        };

        Ok(ForecastArtifacts { adjacency, node_probabilities, graphml })
    }
}

// ============================================================================
// Deadline-bounded runs
// ============================================================================

#[cfg(feature = "runtime")]
impl<S: RasterSource + 'static> Pipeline<S> {
    /// Run on a blocking worker; `Error::Timeout` once `deadline` elapses.
    /// The worker stops at its next window boundary and its results are
    /// dropped.
    pub async fn run_with_deadline(self, deadline: std::time::Duration) -> Result<Vec<WindowForecast>> {
        use std::sync::Arc;

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let worker = tokio::task::spawn_blocking(move || self.run_until(&flag));

        match tokio::time::timeout(deadline, worker).await {
            Ok(joined) => joined.map_err(|e| Error::Io(std::io::Error::other(e)))?,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!(?deadline, "pipeline deadline elapsed");
                Err(Error::Timeout(deadline))
            }
        }
    }
}
