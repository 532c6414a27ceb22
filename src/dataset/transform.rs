//! Per-frame transforms: channel selection, bilinear resize, min–max scaling,
//! plus the sequence reshaping the forecast stage needs.

use ndarray::{concatenate, s, Array3, Axis};

use crate::model::{Frame, Sequence};
use crate::{Error, Result};

/// Keep channels by 0-based index, in the given order.
pub fn select_channels(frame: &Frame, indices: &[usize]) -> Result<Frame> {
    let channels = frame.dim().0;
    if let Some(&bad) = indices.iter().find(|&&i| i >= channels) {
        return Err(Error::shape("channel selection", format!("index < {channels}"), bad));
    }
    Ok(frame.select(Axis(0), indices))
}

/// Map an output coordinate to its source coordinate, `align_corners = false`.
fn source_index(dst: usize, scale: f32) -> f32 {
    let src = scale * (dst as f32 + 0.5) - 0.5;
    if src < 0.0 { 0.0 } else { src }
}

/// Bilinear resize of every channel to `(out_h, out_w)`.
///
/// Sampling follows half-pixel centres with edge clamping, so identity
/// sizes return the input unchanged.
pub fn resize_bilinear(frame: &Frame, out_h: usize, out_w: usize) -> Result<Frame> {
    if out_h == 0 || out_w == 0 {
        return Err(Error::Configuration(format!(
            "resize target must be non-zero, got {out_h}x{out_w}"
        )));
    }
    let (c, in_h, in_w) = frame.dim();
    if (in_h, in_w) == (out_h, out_w) {
        return Ok(frame.clone());
    }
    if in_h == 0 || in_w == 0 {
        return Err(Error::shape("resize input", "non-empty grid", (in_h, in_w)));
    }

    let scale_h = in_h as f32 / out_h as f32;
    let scale_w = in_w as f32 / out_w as f32;

    // Per-axis taps are shared by every channel.
    let taps = |out: usize, input: usize, scale: f32| -> Vec<(usize, usize, f32)> {
        (0..out)
            .map(|d| {
                let src = source_index(d, scale);
                let i0 = (src.floor() as usize).min(input - 1);
                let i1 = if i0 < input - 1 { i0 + 1 } else { i0 };
                (i0, i1, src - i0 as f32)
            })
            .collect()
    };
    let rows = taps(out_h, in_h, scale_h);
    let cols = taps(out_w, in_w, scale_w);

    let mut out = Array3::<f32>::zeros((c, out_h, out_w));
    for ch in 0..c {
        let plane = frame.index_axis(Axis(0), ch);
        for (y, &(y0, y1, ly)) in rows.iter().enumerate() {
            for (x, &(x0, x1, lx)) in cols.iter().enumerate() {
                let top = plane[[y0, x0]] * (1.0 - lx) + plane[[y0, x1]] * lx;
                let bottom = plane[[y1, x0]] * (1.0 - lx) + plane[[y1, x1]] * lx;
                out[[ch, y, x]] = top * (1.0 - ly) + bottom * ly;
            }
        }
    }
    Ok(out)
}

/// Rescale the whole frame to `[0, 1]`. Constant frames pass through.
pub fn min_max_normalize(mut frame: Frame) -> Frame {
    let (min, max) = frame
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max > min {
        let range = max - min;
        frame.mapv_inplace(|v| (v - min) / range);
    }
    frame
}

/// Tile a single-channel sequence `[T, 1, H, W]` to `[T, n, H, W]`.
///
/// Sequences that already have `n` channels are returned as-is.
pub fn repeat_channels(seq: Sequence, n: usize) -> Result<Sequence> {
    let c = seq.dim().1;
    if c == n {
        return Ok(seq);
    }
    if c != 1 {
        return Err(Error::shape("channel repeat", format!("1 or {n} channels"), c));
    }
    let copies: Vec<_> = (0..n).map(|_| seq.view()).collect();
    concatenate(Axis(1), &copies).map_err(|e| Error::shape("channel repeat", n, e.to_string()))
}

/// Split a window into its context (`T-1` frames) and target (last frame).
pub fn split_context_target(seq: &Sequence) -> Result<(Sequence, Frame)> {
    let t = seq.dim().0;
    if t < 2 {
        return Err(Error::shape("context/target split", "at least 2 frames", t));
    }
    let context = seq.slice(s![..t - 1, .., .., ..]).to_owned();
    let target = seq.index_axis(Axis(0), t - 1).to_owned();
    Ok((context, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};

    #[test]
    fn test_select_channels_order() {
        let frame = Frame::from_shape_fn((3, 1, 1), |(c, _, _)| c as f32);
        let out = select_channels(&frame, &[2, 0, 2]).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![2.0, 0.0, 2.0]);
        assert!(select_channels(&frame, &[3]).is_err());
    }

    #[test]
    fn test_resize_upsample_matches_half_pixel_rule() {
        // 1x2 → 1x4: taps at src = -0.25→0, 0.25, 0.75, 1.25→clamped to last
        let frame = array![[[0.0f32, 1.0]]];
        let out = resize_bilinear(&frame, 1, 4).unwrap();
        let got: Vec<f32> = out.iter().copied().collect();
        let want = [0.0, 0.25, 0.75, 1.0];
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-6, "{got:?}");
        }
    }

    #[test]
    fn test_resize_downsample_averages() {
        let frame = array![[[0.0f32, 2.0], [4.0, 6.0]]];
        let out = resize_bilinear(&frame, 1, 1).unwrap();
        assert!((out[[0, 0, 0]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_resize_zero_target() {
        assert!(resize_bilinear(&Frame::zeros((1, 2, 2)), 0, 2).is_err());
    }

    #[test]
    fn test_normalize_range() {
        let frame = array![[[2.0f32, 4.0], [6.0, 10.0]]];
        let out = min_max_normalize(frame);
        assert_eq!(out[[0, 0, 0]], 0.0);
        assert_eq!(out[[0, 1, 1]], 1.0);
        assert_eq!(out[[0, 0, 1]], 0.25);
    }

    #[test]
    fn test_normalize_constant_passthrough() {
        let frame = Frame::from_elem((2, 2, 2), 7.0);
        assert_eq!(min_max_normalize(frame.clone()), frame);
    }

    #[test]
    fn test_repeat_channels() {
        let seq = Array4::<f32>::from_elem((2, 1, 2, 2), 0.5);
        let out = repeat_channels(seq, 3).unwrap();
        assert_eq!(out.dim(), (2, 3, 2, 2));
        assert!(repeat_channels(Array4::zeros((1, 2, 1, 1)), 3).is_err());
    }

    #[test]
    fn test_split_context_target() {
        let seq = Array4::<f32>::from_shape_fn((3, 1, 1, 1), |(t, _, _, _)| t as f32);
        let (ctx, target) = split_context_target(&seq).unwrap();
        assert_eq!(ctx.dim(), (2, 1, 1, 1));
        assert_eq!(target[[0, 0, 0]], 2.0);
        assert!(split_context_target(&Array4::zeros((1, 1, 1, 1))).is_err());
    }
}
