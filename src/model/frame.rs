//! Raster frames and the sequence/batch tensors stacked from them.

use ndarray::{Array3, Array4, Array5};

/// One raster tile, `[C, H, W]`.
pub type Frame = Array3<f32>;

/// A window of frames, `[T, C, H, W]`.
pub type Sequence = Array4<f32>;

/// A batch of windows, `[B, T, C, H, W]`.
pub type Batch = Array5<f32>;

/// Replace non-finite samples in place.
///
/// NaN becomes `0.0`; infinities saturate to the largest finite value of
/// the same sign.
pub fn sanitize(frame: &mut Frame) {
    frame.mapv_inplace(|v| {
        if v.is_nan() {
            0.0
        } else if v == f32::INFINITY {
            f32::MAX
        } else if v == f32::NEG_INFINITY {
            f32::MIN
        } else {
            v
        }
    });
}

/// `(channels, height, width)` of a frame.
pub fn frame_shape(frame: &Frame) -> (usize, usize, usize) {
    frame.dim()
}
