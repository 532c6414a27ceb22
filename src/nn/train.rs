//! Next-frame training: backpropagation through time and Adam.
//!
//! Each window's last frame is the target for the frames before it, scored
//! with mean squared error. Gradients are computed under the model's read
//! lock; the optimizer step takes the write lock, so concurrent inference
//! sees either the old or the new weights, never a mix.
//!
//! ```text
//! context ──forward (traced)──► prediction ──mse──► loss
//!    ▲                                                │
//!    └──── BPTT: head, then steps T-1..0, layers top..0
//! ```

use std::path::PathBuf;

use ndarray::{stack, Array4, Array5, ArrayD, ArrayView5, ArrayViewD, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::cell::{CellState, CellTrace};
use super::checkpoint::save_checkpoint;
use super::conv::ConvGrads;
use super::convlstm::ConvLstm;
use super::weights::SharedModel;
use crate::dataset::{split_context_target, SequenceDataset};
use crate::model::{Frame, Sequence};
use crate::raster::RasterSource;
use crate::{Error, Result};

// ============================================================================
// Gradients
// ============================================================================

/// Loss gradients for every parameter of a [`ConvLstm`].
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub cells: Vec<ConvGrads>,
    pub head: ConvGrads,
}

impl Gradients {
    pub fn zeros_like(model: &ConvLstm) -> Self {
        Self {
            cells: model.cells().iter().map(|cell| ConvGrads::zeros_like(cell.conv())).collect(),
            head: ConvGrads::zeros_like(model.head()),
        }
    }

    /// Tensors in `ConvLstm::named_parameters` order.
    pub fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.cells.iter().chain(std::iter::once(&self.head)).flat_map(ConvGrads::views).collect()
    }

    /// L2 norm over all tensors.
    pub fn global_norm(&self) -> f32 {
        self.tensors()
            .iter()
            .flat_map(|t| t.iter())
            .map(|&g| f64::from(g) * f64::from(g))
            .sum::<f64>()
            .sqrt() as f32
    }

    pub fn scale(&mut self, factor: f32) {
        for grads in self.cells.iter_mut().chain(std::iter::once(&mut self.head)) {
            grads.scale(factor);
        }
    }
}

impl ConvLstm {
    /// MSE of `forward(input)` against `target` and its gradient.
    ///
    /// `target` has the output shape `[B, output_len, C, H, W]`. The loss
    /// is the same value `mse(forward(input), target)` returns.
    pub fn loss_and_gradients(
        &self,
        input: ArrayView5<'_, f32>,
        target: ArrayView5<'_, f32>,
    ) -> Result<(f32, Gradients)> {
        let config = self.config();
        let (b, t, c, h, w) = input.dim();
        if c != config.input_dim {
            return Err(Error::shape("predictor input channels", config.input_dim, c));
        }
        if t == 0 {
            return Err(Error::shape("predictor sequence length", "at least 1 step", t));
        }
        let len = config.output_len;
        if target.dim() != (b, len, c, h, w) {
            return Err(Error::shape("training target", (b, len, c, h, w), target.dim()));
        }

        // Forward, keeping one trace per layer per step.
        let cells = self.cells();
        let mut states: Vec<CellState> = cells.iter().map(|cell| cell.init_state(b, (h, w))).collect();
        let mut traces: Vec<Vec<CellTrace>> = vec![Vec::with_capacity(t); cells.len()];
        for step in 0..t {
            let mut x = input.index_axis(Axis(1), step).to_owned();
            for (layer, cell) in cells.iter().enumerate() {
                let (next, trace) = cell.forward_traced(x.view(), &states[layer])?;
                traces[layer].push(trace);
                x = next.hidden.clone();
                states[layer] = next;
            }
        }
        let top = states
            .last()
            .ok_or_else(|| Error::Configuration("predictor has no layers".into()))?;

        let activation = config.activation;
        let output = self.head().forward(top.hidden.view())?.mapv(activation.resolve());
        let target = target
            .to_shape((b, len * c, h, w))
            .map_err(|e| Error::shape("training target", (b, len * c, h, w), e.to_string()))?;

        let n = output.len() as f32;
        let mut sum = 0.0f64;
        let grad_projected = Zip::from(&output).and(&target).map_collect(|&y, &want| {
            let d = y - want;
            sum += f64::from(d) * f64::from(d);
            2.0 * d / n * activation.derivative_at_output(y)
        });
        let loss = (sum / f64::from(n)) as f32;

        // Backward.
        let mut grads = Gradients::zeros_like(self);
        let grad_top = self.head().backward(top.hidden.view(), grad_projected.view(), &mut grads.head)?;

        let mut grad_hidden: Vec<Array4<f32>> =
            cells.iter().map(|cell| Array4::zeros((b, cell.hidden_dim(), h, w))).collect();
        let mut grad_cell = grad_hidden.clone();
        if let Some(last) = grad_hidden.last_mut() {
            *last += &grad_top;
        }

        for step in (0..t).rev() {
            let mut from_above: Option<Array4<f32>> = None;
            for layer in (0..cells.len()).rev() {
                if let Some(g) = from_above.take() {
                    grad_hidden[layer] += &g;
                }
                let (grad_input, grad_prev) = cells[layer].backward(
                    &traces[layer][step],
                    &grad_hidden[layer],
                    &grad_cell[layer],
                    &mut grads.cells[layer],
                )?;
                grad_hidden[layer] = grad_prev.hidden;
                grad_cell[layer] = grad_prev.cell;
                from_above = Some(grad_input);
            }
        }

        tracing::trace!(batch = b, steps = t, loss, "gradients computed");
        Ok((loss, grads))
    }
}

// ============================================================================
// Adam
// ============================================================================

/// Adam hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self { learning_rate: 1e-4, beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
    }
}

impl AdamConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::Configuration(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::Configuration(format!("epsilon must be positive, got {}", self.epsilon)));
        }
        Ok(())
    }
}

/// Adam with bias-corrected moments, one moment pair per named parameter.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    steps: u64,
    first: Vec<ArrayD<f32>>,
    second: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self { config, steps: 0, first: Vec::new(), second: Vec::new() }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Updates applied so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Apply one update. Every shape is checked before any parameter moves.
    pub fn step(&mut self, model: &mut ConvLstm, grads: &Gradients) -> Result<()> {
        let tensors = grads.tensors();
        let mut params = model.named_parameters_mut();
        if params.len() != tensors.len() {
            return Err(Error::shape("gradient tensors", params.len(), tensors.len()));
        }
        if self.first.is_empty() {
            self.first = tensors.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.second = self.first.clone();
        }
        for (((name, param), grad), moment) in params.iter().zip(&tensors).zip(&self.first) {
            if param.shape() != grad.shape() || moment.shape() != grad.shape() {
                return Err(Error::shape(format!("gradient of {name}"), param.shape(), grad.shape()));
            }
        }

        self.steps += 1;
        let AdamConfig { learning_rate, beta1, beta2, epsilon } = self.config;
        let t = i32::try_from(self.steps).unwrap_or(i32::MAX);
        let lr = learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        for (((_, param), grad), (m, v)) in params
            .iter_mut()
            .zip(&tensors)
            .zip(self.first.iter_mut().zip(self.second.iter_mut()))
        {
            Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *p -= lr * *m / (v.sqrt() + epsilon);
            });
        }
        Ok(())
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Training run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Windows per optimizer step.
    pub batch_size: usize,
    #[serde(flatten)]
    pub optimizer: AdamConfig,
    /// Rescale gradients whose global L2 norm exceeds this.
    pub max_grad_norm: Option<f32>,
    /// Written with `save_checkpoint` once training finishes.
    pub checkpoint: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 1,
            optimizer: AdamConfig::default(),
            max_grad_norm: None,
            checkpoint: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::Configuration(format!(
                "epochs and batch_size must be positive, got {} and {}",
                self.epochs, self.batch_size
            )));
        }
        if let Some(max) = self.max_grad_norm {
            if !(max.is_finite() && max > 0.0) {
                return Err(Error::Configuration(format!("max_grad_norm must be positive, got {max}")));
            }
        }
        self.optimizer.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// Mean batch loss of each epoch, in order.
    pub epoch_losses: Vec<f32>,
    pub checkpoint: Option<PathBuf>,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainConfig,
    optimizer: Adam,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let optimizer = Adam::new(config.optimizer.clone());
        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    /// One optimizer step on a batch. Returns the loss before the update.
    pub fn step(
        &mut self,
        model: &SharedModel,
        context: ArrayView5<'_, f32>,
        target: ArrayView5<'_, f32>,
    ) -> Result<f32> {
        let (loss, mut grads) = model.with_model(|m| m.loss_and_gradients(context, target))?;
        if let Some(max) = self.config.max_grad_norm {
            let norm = grads.global_norm();
            if norm > max {
                grads.scale(max / norm);
            }
        }
        model.update(|m| self.optimizer.step(m, &grads))?;
        Ok(loss)
    }

    /// Train on windows in order, `batch_size` at a time.
    pub fn fit(&mut self, model: &SharedModel, sequences: &[Sequence]) -> Result<TrainReport> {
        if sequences.is_empty() {
            return Err(Error::Configuration("no training windows".into()));
        }
        let output_len = model.config().output_len;
        if output_len != 1 {
            return Err(Error::Configuration(format!(
                "next-frame training needs output_len 1, got {output_len}"
            )));
        }
        let pairs = sequences.iter().map(split_context_target).collect::<Result<Vec<_>>>()?;
        let batches = pairs
            .chunks(self.config.batch_size)
            .map(stack_batch)
            .collect::<Result<Vec<_>>>()?;

        let epochs = self.config.epochs;
        let mut epoch_losses = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let mut total = 0.0f32;
            for (context, target) in &batches {
                total += self.step(model, context.view(), target.view())?;
            }
            let loss = total / batches.len() as f32;
            if epoch % 10 == 0 || epoch + 1 == epochs {
                tracing::info!(epoch, epochs, loss, "training epoch");
            } else {
                tracing::debug!(epoch, epochs, loss, "training epoch");
            }
            epoch_losses.push(loss);
        }

        let checkpoint = match &self.config.checkpoint {
            Some(path) => {
                model.with_model(|m| save_checkpoint(m, path))?;
                tracing::info!(path = %path.display(), "checkpoint saved");
                Some(path.clone())
            }
            None => None,
        };
        Ok(TrainReport { epoch_losses, checkpoint })
    }

    /// `fit` over every window of a dataset.
    pub fn fit_dataset<S: RasterSource>(
        &mut self,
        model: &SharedModel,
        dataset: &SequenceDataset<S>,
    ) -> Result<TrainReport> {
        let sequences = dataset.materialize_parallel()?;
        self.fit(model, &sequences)
    }
}

/// Stack `(context, target)` pairs into `[B, T-1, C, H, W]` and `[B, 1, C, H, W]`.
fn stack_batch(pairs: &[(Sequence, Frame)]) -> Result<(Array5<f32>, Array5<f32>)> {
    let contexts: Vec<_> = pairs.iter().map(|(context, _)| context.view()).collect();
    let targets: Vec<_> = pairs.iter().map(|(_, target)| target.view()).collect();
    let context = stack(Axis(0), &contexts)
        .map_err(|e| Error::shape("training batch", "equal window shapes", e.to_string()))?;
    let target = stack(Axis(0), &targets)
        .map_err(|e| Error::shape("training batch", "equal frame shapes", e.to_string()))?;
    Ok((context, target.insert_axis(Axis(1))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{mse, Activation, ConvLstmConfig};

    fn config(activation: Activation) -> ConvLstmConfig {
        ConvLstmConfig {
            input_dim: 1,
            hidden_dims: vec![2, 3],
            kernel_size: 3,
            output_len: 1,
            activation,
            bias: true,
        }
    }

    fn batch() -> (Array5<f32>, Array5<f32>) {
        let input = Array5::from_shape_fn((2, 3, 1, 3, 3), |(b, t, _, y, x)| {
            ((b * 5 + t * 3 + y * 2 + x) % 7) as f32 / 7.0
        });
        let target = Array5::from_shape_fn((2, 1, 1, 3, 3), |(b, _, _, y, x)| ((b + y + x) % 3) as f32 / 2.0);
        (input, target)
    }

    fn perturbed_loss(model: &ConvLstm, tensor: usize, index: usize, delta: f32) -> f32 {
        let (input, target) = batch();
        let mut model = model.clone();
        {
            let mut params = model.named_parameters_mut();
            if let Some(v) = params[tensor].1.iter_mut().nth(index) {
                *v += delta;
            }
        }
        model.loss_and_gradients(input.view(), target.view()).unwrap().0
    }

    #[test]
    fn test_loss_matches_forward_mse() {
        let model = ConvLstm::new(config(Activation::Sigmoid), 4).unwrap();
        let (input, target) = batch();
        let (loss, _) = model.loss_and_gradients(input.view(), target.view()).unwrap();
        let want = mse(model.forward(input.view()).unwrap().view(), target.view()).unwrap();
        assert!((loss - want).abs() < 1e-6);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        for activation in [Activation::Sigmoid, Activation::Identity] {
            let model = ConvLstm::new(config(activation), 8).unwrap();
            let (input, target) = batch();
            let (_, grads) = model.loss_and_gradients(input.view(), target.view()).unwrap();
            let tensors = grads.tensors();
            assert_eq!(tensors.len(), model.named_parameters().len());

            let eps = 5e-3f32;
            for (k, tensor) in tensors.iter().enumerate() {
                for index in [0, tensor.len() / 2, tensor.len() - 1] {
                    let analytic = tensor.iter().nth(index).copied().unwrap();
                    let numeric = (perturbed_loss(&model, k, index, eps) - perturbed_loss(&model, k, index, -eps))
                        / (2.0 * eps);
                    assert!(
                        (numeric - analytic).abs() < 2e-3 + 5e-2 * analytic.abs(),
                        "{activation} tensor {k} index {index}: numeric {numeric}, analytic {analytic}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_target_shape_checked() {
        let model = ConvLstm::zeroed(config(Activation::Sigmoid)).unwrap();
        let (input, _) = batch();
        let wrong = Array5::<f32>::zeros((2, 2, 1, 3, 3));
        assert!(matches!(
            model.loss_and_gradients(input.view(), wrong.view()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_adam_step_lowers_loss() {
        let model = ConvLstm::new(config(Activation::Sigmoid), 2).unwrap();
        let (input, target) = batch();
        let (before, grads) = model.loss_and_gradients(input.view(), target.view()).unwrap();

        let mut stepped = model.clone();
        let mut adam = Adam::new(AdamConfig { learning_rate: 1e-3, ..AdamConfig::default() });
        adam.step(&mut stepped, &grads).unwrap();
        assert_eq!(adam.steps(), 1);
        let (after, _) = stepped.loss_and_gradients(input.view(), target.view()).unwrap();
        assert!(after < before, "{after} >= {before}");
    }

    #[test]
    fn test_zero_gradient_leaves_weights() {
        let model = ConvLstm::new(config(Activation::Tanh), 3).unwrap();
        let mut stepped = model.clone();
        let mut adam = Adam::new(AdamConfig::default());
        adam.step(&mut stepped, &Gradients::zeros_like(&model)).unwrap();
        assert_eq!(stepped.state_dict(), model.state_dict());
    }

    #[test]
    fn test_clipping_bounds_norm() {
        let model = ConvLstm::new(config(Activation::Identity), 5).unwrap();
        let (input, target) = batch();
        let (_, mut grads) = model.loss_and_gradients(input.view(), target.view()).unwrap();
        let norm = grads.global_norm();
        assert!(norm > 0.0);
        grads.scale(0.5 / norm);
        assert!((grads.global_norm() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_train_config() {
        assert!(Trainer::new(TrainConfig { epochs: 0, ..TrainConfig::default() }).is_err());
        let bad_beta = AdamConfig { beta1: 1.0, ..AdamConfig::default() };
        assert!(Trainer::new(TrainConfig { optimizer: bad_beta, ..TrainConfig::default() }).is_err());
        assert!(Trainer::new(TrainConfig { max_grad_norm: Some(0.0), ..TrainConfig::default() }).is_err());
    }

    #[test]
    fn test_fit_rejects_multi_step_models() {
        let multi = ConvLstmConfig { output_len: 2, ..config(Activation::Sigmoid) };
        let model = SharedModel::new(ConvLstm::zeroed(multi).unwrap());
        let mut trainer = Trainer::new(TrainConfig { epochs: 1, ..TrainConfig::default() }).unwrap();
        let window = Array4::<f32>::zeros((3, 1, 2, 2));
        assert!(matches!(trainer.fit(&model, &[window]), Err(Error::Configuration(_))));
        assert!(trainer.fit(&model, &[]).is_err());
    }

    #[test]
    fn test_train_config_json_flattens_optimizer() {
        let config: TrainConfig = serde_json::from_str(r#"{"epochs": 5, "learning_rate": 0.01}"#).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.optimizer.learning_rate, 0.01);
        assert_eq!(config.optimizer.beta2, 0.999);
        assert_eq!(config.batch_size, 1);
    }
}
