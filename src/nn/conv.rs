//! Same-padding 2-D convolution, stride 1.
//!
//! Weights use the `[out, in, k, k]` layout and cross-correlation
//! semantics of the checkpoints this crate loads, so a trained kernel
//! drops in without transposition.

use ndarray::{
    s, Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMut3,
    ArrayViewMutD, Axis,
};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};

use crate::{Error, Result};

/// Parameter gradients of one [`Conv2d`], accumulated across calls to
/// [`Conv2d::backward`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvGrads {
    pub weight: Array4<f32>,
    pub bias: Option<Array1<f32>>,
}

impl ConvGrads {
    pub fn zeros_like(conv: &Conv2d) -> Self {
        Self {
            weight: Array4::zeros(conv.weight.raw_dim()),
            bias: conv.bias.as_ref().map(|b| Array1::zeros(b.len())),
        }
    }

    /// Same order as `Conv2d::named_params`.
    pub(crate) fn views(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = vec![self.weight.view().into_dyn()];
        if let Some(b) = &self.bias {
            out.push(b.view().into_dyn());
        }
        out
    }

    pub(crate) fn scale(&mut self, factor: f32) {
        self.weight.mapv_inplace(|g| g * factor);
        if let Some(b) = &mut self.bias {
            b.mapv_inplace(|g| g * factor);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conv2d {
    weight: Array4<f32>,
    bias: Option<Array1<f32>>,
    padding: usize,
}

impl Conv2d {
    /// Uniform `±1/sqrt(fan_in)` initialization.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bias: bool,
        rng: &mut StdRng,
    ) -> Result<Self> {
        check_kernel(kernel_size)?;
        let fan_in = (in_channels * kernel_size * kernel_size).max(1) as f32;
        let bound = 1.0 / fan_in.sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weight = Array4::from_shape_simple_fn(
            (out_channels, in_channels, kernel_size, kernel_size),
            || dist.sample(rng),
        );
        let bias = bias.then(|| Array1::from_shape_simple_fn(out_channels, || dist.sample(rng)));
        Ok(Self { weight, bias, padding: kernel_size / 2 })
    }

    /// All-zero weights and bias.
    pub fn zeroed(in_channels: usize, out_channels: usize, kernel_size: usize, bias: bool) -> Result<Self> {
        check_kernel(kernel_size)?;
        Ok(Self {
            weight: Array4::zeros((out_channels, in_channels, kernel_size, kernel_size)),
            bias: bias.then(|| Array1::zeros(out_channels)),
            padding: kernel_size / 2,
        })
    }

    /// Wrap explicit parameters.
    pub fn from_parts(weight: Array4<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        let (out, _, kh, kw) = weight.dim();
        if kh != kw {
            return Err(Error::shape("conv kernel", "square kernel", (kh, kw)));
        }
        check_kernel(kh)?;
        if let Some(b) = &bias {
            if b.len() != out {
                return Err(Error::shape("conv bias", out, b.len()));
            }
        }
        Ok(Self { weight, bias, padding: kh / 2 })
    }

    pub fn in_channels(&self) -> usize { self.weight.dim().1 }
    pub fn out_channels(&self) -> usize { self.weight.dim().0 }
    pub fn kernel_size(&self) -> usize { self.weight.dim().2 }
    pub fn weight(&self) -> &Array4<f32> { &self.weight }
    pub fn bias(&self) -> Option<&Array1<f32>> { self.bias.as_ref() }

    /// `(suffix, view)` pairs: `weight`, then `bias` when present.
    pub(crate) fn named_params(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        let mut out = vec![("weight", self.weight.view().into_dyn())];
        if let Some(b) = &self.bias {
            out.push(("bias", b.view().into_dyn()));
        }
        out
    }

    pub(crate) fn named_params_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        let mut out = vec![("weight", self.weight.view_mut().into_dyn())];
        if let Some(b) = &mut self.bias {
            out.push(("bias", b.view_mut().into_dyn()));
        }
        out
    }

    /// `[B, in, H, W]` → `[B, out, H, W]`.
    pub fn forward(&self, x: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        if c != self.in_channels() {
            return Err(Error::shape("conv input channels", self.in_channels(), c));
        }
        let mut out = Array4::<f32>::zeros((b, self.out_channels(), h, w));
        for (i, mut slot) in out.axis_iter_mut(Axis(0)).enumerate() {
            slot.assign(&self.forward_single(x.index_axis(Axis(0), i))?);
        }
        Ok(out)
    }

    fn forward_single(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (c, h, w) = x.dim();
        let k = self.kernel_size();
        let cols = im2col(x, k, self.padding);

        let kernel = self
            .weight
            .to_shape((self.out_channels(), c * k * k))
            .map_err(|e| Error::shape("conv kernel", (self.out_channels(), c * k * k), e.to_string()))?;
        let mut out = kernel.dot(&cols);
        if let Some(bias) = &self.bias {
            out += &bias.view().insert_axis(Axis(1));
        }
        out.into_shape_with_order((self.out_channels(), h, w))
            .map_err(|e| Error::shape("conv output", (self.out_channels(), h, w), e.to_string()))
    }
}

impl Conv2d {
    /// Gradient of `forward(x)`: adds the parameter gradients for
    /// `grad_out` (`[B, out, H, W]`) into `grads` and returns the gradient
    /// with respect to `x`.
    pub fn backward(
        &self,
        x: ArrayView4<'_, f32>,
        grad_out: ArrayView4<'_, f32>,
        grads: &mut ConvGrads,
    ) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        let (out_c, k) = (self.out_channels(), self.kernel_size());
        if c != self.in_channels() {
            return Err(Error::shape("conv input channels", self.in_channels(), c));
        }
        if grad_out.dim() != (b, out_c, h, w) {
            return Err(Error::shape("conv output gradient", (b, out_c, h, w), grad_out.dim()));
        }
        if grads.weight.dim() != self.weight.dim() {
            return Err(Error::shape("conv weight gradient", self.weight.dim(), grads.weight.dim()));
        }

        let kernel = self
            .weight
            .to_shape((out_c, c * k * k))
            .map_err(|e| Error::shape("conv kernel", (out_c, c * k * k), e.to_string()))?;
        let mut grad_x = Array4::<f32>::zeros((b, c, h, w));

        for i in 0..b {
            let cols = im2col(x.index_axis(Axis(0), i), k, self.padding);
            let g_view = grad_out.index_axis(Axis(0), i);
            let g = g_view
                .to_shape((out_c, h * w))
                .map_err(|e| Error::shape("conv output gradient", (out_c, h * w), e.to_string()))?;

            let grad_w = g.dot(&cols.t());
            let grad_w = grad_w
                .to_shape(self.weight.raw_dim())
                .map_err(|e| Error::shape("conv weight gradient", self.weight.dim(), e.to_string()))?;
            grads.weight += &grad_w;
            if let Some(bias) = &mut grads.bias {
                *bias += &g.sum_axis(Axis(1));
            }

            col2im(kernel.t().dot(&g).view(), k, self.padding, grad_x.index_axis_mut(Axis(0), i));
        }
        Ok(grad_x)
    }
}

fn check_kernel(kernel_size: usize) -> Result<()> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(Error::Configuration(format!(
            "kernel size must be odd to preserve the grid, got {kernel_size}"
        )));
    }
    Ok(())
}

/// Unfold `[C, H, W]` into `[C*k*k, H*W]` patches with zero padding.
fn im2col(x: ArrayView3<'_, f32>, k: usize, pad: usize) -> Array2<f32> {
    let (c, h, w) = x.dim();
    let mut cols = Array2::<f32>::zeros((c * k * k, h * w));
    for ci in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let row = (ci * k + ky) * k + kx;
                let mut dst = cols.slice_mut(s![row, ..]);
                for y in 0..h {
                    let sy = y as isize + ky as isize - pad as isize;
                    if sy < 0 || sy >= h as isize {
                        continue;
                    }
                    for xx in 0..w {
                        let sx = xx as isize + kx as isize - pad as isize;
                        if sx < 0 || sx >= w as isize {
                            continue;
                        }
                        dst[y * w + xx] = x[[ci, sy as usize, sx as usize]];
                    }
                }
            }
        }
    }
    cols
}

/// Adjoint of `im2col`: scatter-add `[C*k*k, H*W]` patches back onto `dx`.
fn col2im(cols: ArrayView2<'_, f32>, k: usize, pad: usize, mut dx: ArrayViewMut3<'_, f32>) {
    let (c, h, w) = dx.dim();
    for ci in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let src = cols.row((ci * k + ky) * k + kx);
                for y in 0..h {
                    let sy = y as isize + ky as isize - pad as isize;
                    if sy < 0 || sy >= h as isize {
                        continue;
                    }
                    for xx in 0..w {
                        let sx = xx as isize + kx as isize - pad as isize;
                        if sx < 0 || sx >= w as isize {
                            continue;
                        }
                        dx[[ci, sy as usize, sx as usize]] += src[y * w + xx];
                    }
                }
            }
        }
    }
}
