//! # Execution Backends
//!
//! How a batch is scheduled through the predictor. The model itself is
//! backend-agnostic; backends only decide where the per-sample passes run.
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `SequentialBackend` | One pass over the whole batch on the calling thread |
//! | `RayonBackend` | Batch elements fanned out across a rayon pool |
//!
//! Every backend must produce the same output as `ConvLstm::forward` on the
//! same input. The time loop inside each sample always stays sequential.

use std::sync::Arc;

use ndarray::{concatenate, Array5, ArrayView5, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::convlstm::ConvLstm;
use crate::{Error, Result};

// ============================================================================
// Capabilities
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub parallel_batch: bool,
    /// Worker count, when fixed.
    pub threads: Option<usize>,
}

// ============================================================================
// Backend trait
// ============================================================================

pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// `[B, T, C, H, W]` → `[B, output_len, C, H, W]`.
    fn run(&self, model: &ConvLstm, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>>;
}

// ============================================================================
// Sequential
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl ExecutionBackend for SequentialBackend {
    fn name(&self) -> &str {
        "sequential"
    }

    fn run(&self, model: &ConvLstm, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>> {
        model.forward(batch)
    }
}

// ============================================================================
// Rayon
// ============================================================================

/// Runs each batch element as its own forward pass in parallel.
#[derive(Debug, Clone, Default)]
pub struct RayonBackend {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonBackend {
    /// `None` uses the global rayon pool.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let pool = match threads {
            Some(0) => {
                return Err(Error::Configuration("rayon backend needs at least one thread".into()));
            }
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("firegraph-infer-{i}"))
                    .build()
                    .map_err(|e| Error::Configuration(format!("rayon pool: {e}")))?,
            )),
            None => None,
        };
        Ok(Self { pool })
    }

    fn run_parallel(model: &ConvLstm, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>> {
        let outputs = (0..batch.len_of(Axis(0)))
            .into_par_iter()
            .map(|i| model.forward(batch.slice_axis(Axis(0), (i..i + 1).into())))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| Error::shape("rayon batch join", batch.dim(), e.to_string()))
    }
}

impl ExecutionBackend for RayonBackend {
    fn name(&self) -> &str {
        "rayon"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            parallel_batch: true,
            threads: self.pool.as_ref().map(|p| p.current_num_threads()),
        }
    }

    fn run(&self, model: &ConvLstm, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>> {
        if batch.len_of(Axis(0)) <= 1 {
            return model.forward(batch);
        }
        match &self.pool {
            Some(pool) => pool.install(|| Self::run_parallel(model, batch)),
            None => Self::run_parallel(model, batch),
        }
    }
}

// ============================================================================
// Selection from configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Sequential,
    Rayon {
        #[serde(default)]
        threads: Option<usize>,
    },
}

impl BackendKind {
    pub fn build(&self) -> Result<Box<dyn ExecutionBackend>> {
        let backend: Box<dyn ExecutionBackend> = match self {
            BackendKind::Sequential => Box::new(SequentialBackend),
            BackendKind::Rayon { threads } => Box::new(RayonBackend::new(*threads)?),
        };
        tracing::debug!(backend = backend.name(), "execution backend ready");
        Ok(backend)
    }
}
