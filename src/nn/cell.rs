//! ConvLSTM cell: one gated, convolutional state transition.
//!
//! ```text
//! [x ‖ h] ──conv──► i | f | g | o      (4 × hidden_dim channels)
//! c' = σ(f)·c + σ(i)·tanh(g)
//! h' = σ(o)·tanh(c')
//! ```

use std::ops::Range;

use ndarray::{concatenate, s, Array4, ArrayView4, Axis, Zip};
use rand::rngs::StdRng;

use super::conv::{Conv2d, ConvGrads};
use crate::{Error, Result};

/// Numerically stable logistic function.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Hidden and cell state of one layer, each `[B, hidden_dim, H, W]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub hidden: Array4<f32>,
    pub cell: Array4<f32>,
}

impl CellState {
    pub fn zeros(batch: usize, hidden_dim: usize, (height, width): (usize, usize)) -> Self {
        Self {
            hidden: Array4::zeros((batch, hidden_dim, height, width)),
            cell: Array4::zeros((batch, hidden_dim, height, width)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvLstmCell {
    input_dim: usize,
    hidden_dim: usize,
    conv: Conv2d,
}

impl ConvLstmCell {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        kernel_size: usize,
        bias: bool,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let conv = Conv2d::new(input_dim + hidden_dim, 4 * hidden_dim, kernel_size, bias, rng)?;
        Ok(Self { input_dim, hidden_dim, conv })
    }

    pub fn zeroed(input_dim: usize, hidden_dim: usize, kernel_size: usize, bias: bool) -> Result<Self> {
        let conv = Conv2d::zeroed(input_dim + hidden_dim, 4 * hidden_dim, kernel_size, bias)?;
        Ok(Self { input_dim, hidden_dim, conv })
    }

    /// Wrap an existing gate convolution; its shape fixes both dimensions.
    pub fn from_conv(input_dim: usize, conv: Conv2d) -> Result<Self> {
        let out = conv.out_channels();
        if out % 4 != 0 || out == 0 {
            return Err(Error::shape("gate conv outputs", "positive multiple of 4", out));
        }
        let hidden_dim = out / 4;
        if conv.in_channels() != input_dim + hidden_dim {
            return Err(Error::shape("gate conv inputs", input_dim + hidden_dim, conv.in_channels()));
        }
        Ok(Self { input_dim, hidden_dim, conv })
    }

    pub fn input_dim(&self) -> usize { self.input_dim }
    pub fn hidden_dim(&self) -> usize { self.hidden_dim }
    pub fn conv(&self) -> &Conv2d { &self.conv }
    pub(crate) fn conv_mut(&mut self) -> &mut Conv2d { &mut self.conv }

    pub fn init_state(&self, batch: usize, size: (usize, usize)) -> CellState {
        CellState::zeros(batch, self.hidden_dim, size)
    }

    /// Advance one time step.
    pub fn forward(&self, x: ArrayView4<'_, f32>, state: &CellState) -> Result<CellState> {
        self.forward_traced(x, state).map(|(next, _)| next)
    }

    /// Advance one time step, keeping the activations `backward` needs.
    pub(crate) fn forward_traced(&self, x: ArrayView4<'_, f32>, state: &CellState) -> Result<(CellState, CellTrace)> {
        let (b, c, h, w) = x.dim();
        if c != self.input_dim {
            return Err(Error::shape("cell input channels", self.input_dim, c));
        }
        let expected = (b, self.hidden_dim, h, w);
        if state.hidden.dim() != expected || state.cell.dim() != expected {
            return Err(Error::shape("cell state", expected, state.hidden.dim()));
        }

        let combined = concatenate(Axis(1), &[x.view(), state.hidden.view()])
            .map_err(|e| Error::shape("cell concat", expected, e.to_string()))?;
        let gates = self.conv.forward(combined.view())?;

        let hd = self.hidden_dim;
        let gate = |range: Range<usize>, f: fn(f32) -> f32| gates.slice(s![.., range, .., ..]).mapv(f);
        let input_gate = gate(0..hd, sigmoid);
        let forget_gate = gate(hd..2 * hd, sigmoid);
        let candidate = gate(2 * hd..3 * hd, f32::tanh);
        let output_gate = gate(3 * hd..4 * hd, sigmoid);

        let cell = &forget_gate * &state.cell + &input_gate * &candidate;
        let hidden = &output_gate * &cell.mapv(f32::tanh);

        let trace = CellTrace {
            combined,
            input_gate,
            forget_gate,
            candidate,
            output_gate,
            prev_cell: state.cell.clone(),
            cell: cell.clone(),
        };
        Ok((CellState { hidden, cell }, trace))
    }

    /// Backpropagate one step.
    ///
    /// `grad_hidden`/`grad_cell` are the loss gradients with respect to the
    /// step's output state. Gate convolution gradients are added into
    /// `grads`; the return value is the gradient with respect to the step
    /// input `x` and the previous state.
    pub(crate) fn backward(
        &self,
        trace: &CellTrace,
        grad_hidden: &Array4<f32>,
        grad_cell: &Array4<f32>,
        grads: &mut ConvGrads,
    ) -> Result<(Array4<f32>, CellState)> {
        let expected = trace.cell.dim();
        if grad_hidden.dim() != expected || grad_cell.dim() != expected {
            return Err(Error::shape("cell state gradient", expected, grad_hidden.dim()));
        }

        let tanh_cell = trace.cell.mapv(f32::tanh);
        let mut d_cell = grad_cell.clone();
        Zip::from(&mut d_cell)
            .and(grad_hidden)
            .and(&trace.output_gate)
            .and(&tanh_cell)
            .for_each(|dc, &dh, &o, &tc| *dc += dh * o * (1.0 - tc * tc));

        let d_output = Zip::from(grad_hidden)
            .and(&tanh_cell)
            .and(&trace.output_gate)
            .map_collect(|&dh, &tc, &o| dh * tc * o * (1.0 - o));
        let d_input = Zip::from(&d_cell)
            .and(&trace.candidate)
            .and(&trace.input_gate)
            .map_collect(|&dc, &g, &i| dc * g * i * (1.0 - i));
        let d_forget = Zip::from(&d_cell)
            .and(&trace.prev_cell)
            .and(&trace.forget_gate)
            .map_collect(|&dc, &cp, &f| dc * cp * f * (1.0 - f));
        let d_candidate = Zip::from(&d_cell)
            .and(&trace.input_gate)
            .and(&trace.candidate)
            .map_collect(|&dc, &i, &g| dc * i * (1.0 - g * g));

        let grad_gates = concatenate(
            Axis(1),
            &[d_input.view(), d_forget.view(), d_candidate.view(), d_output.view()],
        )
        .map_err(|e| Error::shape("gate gradient concat", expected, e.to_string()))?;
        let grad_combined = self.conv.backward(trace.combined.view(), grad_gates.view(), grads)?;

        let grad_x = grad_combined.slice(s![.., ..self.input_dim, .., ..]).to_owned();
        let grad_prev = CellState {
            hidden: grad_combined.slice(s![.., self.input_dim.., .., ..]).to_owned(),
            cell: &d_cell * &trace.forget_gate,
        };
        Ok((grad_x, grad_prev))
    }
}

/// Activations of one forward step: the concatenated input, the activated
/// gates, and the cell state before and after.
#[derive(Debug, Clone)]
pub(crate) struct CellTrace {
    combined: Array4<f32>,
    input_gate: Array4<f32>,
    forget_gate: Array4<f32>,
    candidate: Array4<f32>,
    output_gate: Array4<f32>,
    prev_cell: Array4<f32>,
    cell: Array4<f32>,
}
