//! Shared, lock-guarded model weights.
//!
//! Inference holds the read lock for a whole forward pass; checkpoint loads
//! and in-place updates take the write lock, so a pass never observes a
//! half-applied update.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array5, ArrayView5};
use parking_lot::RwLock;

use super::backend::ExecutionBackend;
use super::checkpoint::{load_checkpoint_file, LoadReport, StateDict};
use super::convlstm::{ConvLstm, ConvLstmConfig};
use crate::Result;

#[derive(Debug, Clone)]
pub struct SharedModel {
    inner: Arc<RwLock<ConvLstm>>,
}

impl SharedModel {
    pub fn new(model: ConvLstm) -> Self {
        Self { inner: Arc::new(RwLock::new(model)) }
    }

    pub fn config(&self) -> ConvLstmConfig {
        self.inner.read().config().clone()
    }

    pub fn forward(&self, backend: &dyn ExecutionBackend, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>> {
        let model = self.inner.read();
        backend.run(&model, batch)
    }

    pub fn load_state_dict(&self, dict: &StateDict) -> Result<LoadReport> {
        self.inner.write().load_state_dict(dict)
    }

    /// Parse first, then lock, so a bad file never blocks readers.
    pub fn load_checkpoint(&self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let dict = load_checkpoint_file(path.as_ref())?;
        let report = self.load_state_dict(&dict)?;
        tracing::info!(path = %path.as_ref().display(), loaded = report.loaded.len(), "weights reloaded");
        Ok(report)
    }

    /// Mutate the model under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut ConvLstm) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Read the model under the read lock.
    pub fn with_model<R>(&self, f: impl FnOnce(&ConvLstm) -> R) -> R {
        f(&self.inner.read())
    }
}

impl From<ConvLstm> for SharedModel {
    fn from(model: ConvLstm) -> Self {
        Self::new(model)
    }
}
