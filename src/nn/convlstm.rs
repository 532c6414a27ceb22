//! Stacked ConvLSTM predictor.
//!
//! Layers are driven strictly in time order: the state of step `t` depends
//! on step `t-1`, so the time loop is never parallelized. Recurrent state is
//! a `Vec<CellState>` owned by the forward call and dropped when it returns.

use std::fmt;

use ndarray::{Array5, ArrayView5, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::cell::{sigmoid, CellState, ConvLstmCell};
use super::conv::Conv2d;
use crate::{Error, Result};

// ============================================================================
// Output activation
// ============================================================================

/// Final activation applied to the projected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Activation {
    #[default]
    Sigmoid,
    Tanh,
    Identity,
}

impl Activation {
    /// Resolve a name. Anything other than `sigmoid`/`tanh` is the identity.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sigmoid" => Activation::Sigmoid,
            "tanh" => Activation::Tanh,
            _ => Activation::Identity,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Identity => "identity",
        }
    }

    /// The element-wise function, resolved once.
    pub fn resolve(self) -> fn(f32) -> f32 {
        fn identity(x: f32) -> f32 { x }
        fn tanh(x: f32) -> f32 { x.tanh() }
        match self {
            Activation::Sigmoid => sigmoid,
            Activation::Tanh => tanh,
            Activation::Identity => identity,
        }
    }

    /// Derivative written in terms of the activation's output `y`.
    pub(crate) fn derivative_at_output(self, y: f32) -> f32 {
        match self {
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Identity => 1.0,
        }
    }
}

impl From<String> for Activation {
    fn from(name: String) -> Self {
        Activation::from_name(&name)
    }
}

impl From<Activation> for String {
    fn from(act: Activation) -> Self {
        act.name().to_string()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Architecture of the stacked predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvLstmConfig {
    /// Channels per input frame (and per predicted frame).
    pub input_dim: usize,
    /// Hidden channels per layer; its length is the layer count.
    pub hidden_dims: Vec<usize>,
    pub kernel_size: usize,
    /// Future frames predicted per call.
    pub output_len: usize,
    pub activation: Activation,
    pub bias: bool,
}

impl Default for ConvLstmConfig {
    fn default() -> Self {
        Self {
            input_dim: 3,
            hidden_dims: vec![32, 64, 32],
            kernel_size: 3,
            output_len: 1,
            activation: Activation::Sigmoid,
            bias: true,
        }
    }
}

impl ConvLstmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(Error::Configuration("input_dim must be positive".into()));
        }
        if self.hidden_dims.is_empty() || self.hidden_dims.contains(&0) {
            return Err(Error::Configuration(format!(
                "hidden_dims must be non-empty and positive, got {:?}",
                self.hidden_dims
            )));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(Error::Configuration(format!(
                "kernel_size must be odd, got {}",
                self.kernel_size
            )));
        }
        if self.output_len == 0 {
            return Err(Error::Configuration("output_len must be positive".into()));
        }
        Ok(())
    }

    pub fn num_layers(&self) -> usize {
        self.hidden_dims.len()
    }

    /// Input channel count of each layer.
    fn layer_inputs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        std::iter::once(self.input_dim)
            .chain(self.hidden_dims.iter().copied())
            .zip(self.hidden_dims.iter().copied())
    }
}

// ============================================================================
// ConvLstm
// ============================================================================

/// Stacked ConvLSTM with a 1×1 output projection.
#[derive(Clone)]
pub struct ConvLstm {
    config: ConvLstmConfig,
    cells: Vec<ConvLstmCell>,
    head: Conv2d,
    activate: fn(f32) -> f32,
}

impl fmt::Debug for ConvLstm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvLstm")
            .field("config", &self.config)
            .field("parameters", &self.parameter_count())
            .finish()
    }
}

impl ConvLstm {
    /// Randomly initialized model, reproducible from `seed`.
    pub fn new(config: ConvLstmConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let cells = config
            .layer_inputs()
            .map(|(input, hidden)| ConvLstmCell::new(input, hidden, config.kernel_size, config.bias, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        let head = Conv2d::new(
            config.hidden_dims[config.num_layers() - 1],
            config.input_dim * config.output_len,
            1,
            true,
            &mut rng,
        )?;
        let activate = config.activation.resolve();
        Ok(Self { config, cells, head, activate })
    }

    /// All parameters zero.
    pub fn zeroed(config: ConvLstmConfig) -> Result<Self> {
        config.validate()?;
        let cells = config
            .layer_inputs()
            .map(|(input, hidden)| ConvLstmCell::zeroed(input, hidden, config.kernel_size, config.bias))
            .collect::<Result<Vec<_>>>()?;
        let head = Conv2d::zeroed(
            config.hidden_dims[config.num_layers() - 1],
            config.input_dim * config.output_len,
            1,
            true,
        )?;
        let activate = config.activation.resolve();
        Ok(Self { config, cells, head, activate })
    }

    pub fn config(&self) -> &ConvLstmConfig { &self.config }
    pub fn cells(&self) -> &[ConvLstmCell] { &self.cells }
    pub fn head(&self) -> &Conv2d { &self.head }

    pub fn parameter_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, v)| v.len()).sum()
    }

    /// `[B, T, C, H, W]` → `[B, output_len, C, H, W]`.
    pub fn forward(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>> {
        let (b, t, c, h, w) = input.dim();
        if c != self.config.input_dim {
            return Err(Error::shape("predictor input channels", self.config.input_dim, c));
        }
        if t == 0 {
            return Err(Error::shape("predictor sequence length", "at least 1 step", t));
        }

        let mut states: Vec<CellState> =
            self.cells.iter().map(|cell| cell.init_state(b, (h, w))).collect();

        for step in 0..t {
            let mut x = input.index_axis(Axis(1), step).to_owned();
            for (cell, state) in self.cells.iter().zip(states.iter_mut()) {
                *state = cell.forward(x.view(), state)?;
                x = state.hidden.clone();
            }
        }

        let top = states
            .last()
            .ok_or_else(|| Error::Configuration("predictor has no layers".into()))?;
        let projected = self.head.forward(top.hidden.view())?;
        let len = self.config.output_len;
        let mut out = projected
            .into_shape_with_order((b, len, c, h, w))
            .map_err(|e| Error::shape("predictor output", (b, len, c, h, w), e.to_string()))?;
        out.mapv_inplace(self.activate);

        tracing::debug!(batch = b, steps = t, height = h, width = w, "forward pass complete");
        Ok(out)
    }

    // ========================================================================
    // Named parameters
    // ========================================================================

    /// Parameters under their checkpoint names.
    pub fn named_parameters(&self) -> Vec<(String, ndarray::ArrayViewD<'_, f32>)> {
        let mut out = Vec::new();
        for (i, cell) in self.cells.iter().enumerate() {
            for (suffix, view) in cell.conv().named_params() {
                out.push((format!("convlstm.cell_list.{i}.conv.{suffix}"), view));
            }
        }
        for (suffix, view) in self.head.named_params() {
            out.push((format!("convlstm.conv_out.{suffix}"), view));
        }
        out
    }

    pub(crate) fn named_parameters_mut(&mut self) -> Vec<(String, ndarray::ArrayViewMutD<'_, f32>)> {
        let mut out = Vec::new();
        for (i, cell) in self.cells.iter_mut().enumerate() {
            for (suffix, view) in cell.conv_mut().named_params_mut() {
                out.push((format!("convlstm.cell_list.{i}.conv.{suffix}"), view));
            }
        }
        for (suffix, view) in self.head.named_params_mut() {
            out.push((format!("convlstm.conv_out.{suffix}"), view));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    fn small(activation: Activation) -> ConvLstmConfig {
        ConvLstmConfig {
            input_dim: 2,
            hidden_dims: vec![3, 4],
            kernel_size: 3,
            output_len: 1,
            activation,
            bias: true,
        }
    }

    #[test]
    fn test_activation_names() {
        assert_eq!(Activation::from_name("Sigmoid"), Activation::Sigmoid);
        assert_eq!(Activation::from_name("tanh"), Activation::Tanh);
        assert_eq!(Activation::from_name("relu"), Activation::Identity);
        let parsed: Activation = serde_json::from_str("\"tanh\"").unwrap();
        assert_eq!(parsed, Activation::Tanh);
        assert_eq!(serde_json::to_string(&Activation::Identity).unwrap(), "\"identity\"");
    }

    #[test]
    fn test_output_shape() {
        let model = ConvLstm::new(small(Activation::Sigmoid), 11).unwrap();
        let input = Array5::<f32>::from_elem((2, 4, 2, 5, 6), 0.25);
        let out = model.forward(input.view()).unwrap();
        assert_eq!(out.dim(), (2, 1, 2, 5, 6));
        assert!(out.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_multi_step_output_shape() {
        let config = ConvLstmConfig { output_len: 3, ..small(Activation::Tanh) };
        let model = ConvLstm::new(config, 1).unwrap();
        let input = Array5::<f32>::zeros((1, 2, 2, 3, 3));
        let out = model.forward(input.view()).unwrap();
        assert_eq!(out.dim(), (1, 3, 2, 3, 3));
        assert!(out.iter().all(|&v| v.abs() < 1.0));
    }

    #[test]
    fn test_zeroed_model_outputs_half() {
        let model = ConvLstm::zeroed(small(Activation::Sigmoid)).unwrap();
        let input = Array5::<f32>::from_elem((1, 3, 2, 2, 2), 0.9);
        let out = model.forward(input.view()).unwrap();
        assert!(out.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_identity_activation_is_unbounded_projection() {
        let model = ConvLstm::zeroed(small(Activation::Identity)).unwrap();
        let input = Array5::<f32>::zeros((1, 1, 2, 2, 2));
        let out = model.forward(input.view()).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_channel_mismatch() {
        let model = ConvLstm::zeroed(small(Activation::Sigmoid)).unwrap();
        let input = Array5::<f32>::zeros((1, 2, 3, 4, 4));
        assert!(matches!(model.forward(input.view()), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let model = ConvLstm::zeroed(small(Activation::Sigmoid)).unwrap();
        let input = Array5::<f32>::zeros((1, 0, 2, 4, 4));
        assert!(model.forward(input.view()).is_err());
    }

    #[test]
    fn test_invalid_config() {
        let config = ConvLstmConfig { hidden_dims: vec![], ..ConvLstmConfig::default() };
        assert!(ConvLstm::new(config, 0).is_err());
        let config = ConvLstmConfig { kernel_size: 4, ..ConvLstmConfig::default() };
        assert!(matches!(ConvLstm::zeroed(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_forward_is_deterministic_and_stateless() {
        let model = ConvLstm::new(small(Activation::Sigmoid), 99).unwrap();
        let input = Array5::from_shape_fn((1, 3, 2, 4, 4), |(_, t, c, y, x)| {
            ((t + c + y * x) % 5) as f32 / 5.0
        });
        let a = model.forward(input.view()).unwrap();
        let b = model.forward(input.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_names() {
        let model = ConvLstm::zeroed(small(Activation::Sigmoid)).unwrap();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![
            "convlstm.cell_list.0.conv.weight",
            "convlstm.cell_list.0.conv.bias",
            "convlstm.cell_list.1.conv.weight",
            "convlstm.cell_list.1.conv.bias",
            "convlstm.conv_out.weight",
            "convlstm.conv_out.bias",
        ]);
        // (2+3)*12*9 + 12 + (3+4)*16*9 + 16 + 4*2 + 2
        assert_eq!(model.parameter_count(), 540 + 12 + 1008 + 16 + 8 + 2);
    }
}
