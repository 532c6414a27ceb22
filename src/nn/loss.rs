//! Next-frame loss evaluation. Gradients live in `train`.

use ndarray::{ArrayView, Axis, Dimension, Zip};

use super::backend::ExecutionBackend;
use super::weights::SharedModel;
use crate::dataset::{split_context_target, SequenceDataset};
use crate::raster::RasterSource;
use crate::{Error, Result};

/// Mean squared error over all elements.
pub fn mse<D: Dimension>(prediction: ArrayView<'_, f32, D>, target: ArrayView<'_, f32, D>) -> Result<f32> {
    if prediction.shape() != target.shape() {
        return Err(Error::shape("mse operands", target.shape(), prediction.shape()));
    }
    if prediction.is_empty() {
        return Ok(0.0);
    }
    let mut sum = 0.0f64;
    Zip::from(&prediction).and(&target).for_each(|&p, &t| {
        let d = f64::from(p - t);
        sum += d * d;
    });
    Ok((sum / prediction.len() as f64) as f32)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalReport {
    /// Per-window loss, in window order.
    pub per_window: Vec<f32>,
    pub mean: f32,
}

/// Predict the last frame of every window from the frames before it.
pub fn evaluate_next_frame<S: RasterSource>(
    model: &SharedModel,
    backend: &dyn ExecutionBackend,
    dataset: &SequenceDataset<S>,
) -> Result<EvalReport> {
    dataset.ensure_non_empty()?;
    let mut per_window = Vec::with_capacity(dataset.len());
    for (index, sequence) in dataset.iter().enumerate() {
        let (context, target) = split_context_target(&sequence?)?;
        let prediction = model.forward(backend, context.insert_axis(Axis(0)).view())?;
        let next = prediction.index_axis(Axis(0), 0);
        let next = next.index_axis(Axis(0), 0);
        let loss = mse(next, target.view())?;
        tracing::debug!(window = index, loss, "window evaluated");
        per_window.push(loss);
    }
    let mean = per_window.iter().sum::<f32>() / per_window.len() as f32;
    tracing::info!(windows = per_window.len(), mean, "next-frame evaluation complete");
    Ok(EvalReport { per_window, mean })
}
