//! # Windowed Sequence Builder
//!
//! Sorted raster listing → fixed-length stride-1 windows → stacked,
//! normalized `[T, C, H, W]` sequences.
//!
//! ```text
//! ids (sorted) ──► Window { ids[i..i+T] } ──► per frame:
//!     read(All) → sanitize → select channels → resize → min–max
//!   ──► stack along T
//! ```
//!
//! Frames are decoded on every access; nothing is cached. Windows share no
//! mutable state, so `materialize_parallel` may build them on any thread.

pub mod transform;

use chrono::NaiveDate;
use ndarray::{stack, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::{sanitize, Batch, Frame, Sequence};
use crate::raster::{BandSelection, RasterSource};
use crate::{Error, Result};

pub use transform::{
    min_max_normalize, repeat_channels, resize_bilinear, select_channels, split_context_target,
};

// ============================================================================
// Configuration
// ============================================================================

/// Which channels of each frame enter the sequence (0-based).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelector {
    #[default]
    All,
    Indices(Vec<usize>),
}

/// How windows are cut and frames prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSpec {
    pub seq_len: usize,
    pub channels: ChannelSelector,
    /// Target `(height, width)`; `None` keeps the source grid.
    pub resize_to: Option<(usize, usize)>,
    pub normalize: bool,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            seq_len: 5,
            channels: ChannelSelector::All,
            resize_to: Some((256, 256)),
            normalize: true,
        }
    }
}

impl WindowSpec {
    pub fn validate(&self) -> Result<()> {
        if self.seq_len == 0 {
            return Err(Error::Configuration("seq_len must be at least 1".into()));
        }
        if let ChannelSelector::Indices(idx) = &self.channels {
            if idx.is_empty() {
                return Err(Error::Configuration("channel selector lists no channels".into()));
            }
        }
        if let Some((h, w)) = self.resize_to {
            if h == 0 || w == 0 {
                return Err(Error::Configuration(format!("resize_to must be non-zero, got {h}x{w}")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Windows
// ============================================================================

/// One contiguous slice of the sorted listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub ids: Vec<String>,
    /// Acquisition date of the first frame, when its id is `YYYY-MM-DD`.
    pub start_date: Option<NaiveDate>,
    /// Acquisition date of the last frame, when its id is `YYYY-MM-DD`.
    pub end_date: Option<NaiveDate>,
}

fn parse_date(id: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(id, "%Y-%m-%d").ok()
}

/// `max(0, n - seq_len + 1)` windows over already-sorted ids.
pub fn make_windows(ids: &[String], seq_len: usize) -> Vec<Window> {
    if seq_len == 0 || ids.len() < seq_len {
        return Vec::new();
    }
    ids.windows(seq_len)
        .enumerate()
        .map(|(index, slice)| Window {
            index,
            ids: slice.to_vec(),
            start_date: slice.first().and_then(|id| parse_date(id)),
            end_date: slice.last().and_then(|id| parse_date(id)),
        })
        .collect()
}

// ============================================================================
// SequenceDataset
// ============================================================================

/// Lazily materialized windows over a raster source.
pub struct SequenceDataset<S: RasterSource> {
    source: S,
    spec: WindowSpec,
    files: usize,
    windows: Vec<Window>,
}

impl<S: RasterSource> SequenceDataset<S> {
    /// List, sort and window the source. Too few files is not an error here;
    /// the dataset is simply empty.
    pub fn new(source: S, spec: WindowSpec) -> Result<Self> {
        spec.validate()?;
        let mut ids = source.list()?;
        ids.sort();
        let windows = make_windows(&ids, spec.seq_len);
        if windows.is_empty() {
            tracing::warn!(
                files = ids.len(),
                seq_len = spec.seq_len,
                "not enough rasters for a single window"
            );
        } else {
            tracing::debug!(files = ids.len(), windows = windows.len(), "windows built");
        }
        Ok(Self { source, spec, files: ids.len(), windows })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn window(&self, idx: usize) -> Option<&Window> {
        self.windows.get(idx)
    }

    /// `InsufficientData` when the listing produced no windows.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.windows.is_empty() {
            return Err(Error::InsufficientData { files: self.files, seq_len: self.spec.seq_len });
        }
        Ok(())
    }

    /// Read and prepare one frame.
    pub fn load_frame(&self, id: &str) -> Result<Frame> {
        let mut frame = self.source.read(id, &BandSelection::All)?;
        sanitize(&mut frame);
        if let ChannelSelector::Indices(idx) = &self.spec.channels {
            frame = select_channels(&frame, idx)?;
        }
        if let Some((h, w)) = self.spec.resize_to {
            frame = resize_bilinear(&frame, h, w)?;
        }
        if self.spec.normalize {
            frame = min_max_normalize(frame);
        }
        Ok(frame)
    }

    fn load_window(&self, window: &Window) -> Result<Sequence> {
        let frames = window
            .ids
            .iter()
            .map(|id| self.load_frame(id))
            .collect::<Result<Vec<_>>>()?;

        let first = frames[0].dim();
        if let Some(bad) = frames.iter().find(|f| f.dim() != first) {
            return Err(Error::shape(format!("window {}", window.index), first, bad.dim()));
        }
        let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
        stack(Axis(0), &views).map_err(|e| Error::shape("window stack", first, e.to_string()))
    }

    /// Materialize window `idx` as `[T, C, H, W]`.
    pub fn get(&self, idx: usize) -> Result<Sequence> {
        self.ensure_non_empty()?;
        let window = self.windows.get(idx).ok_or_else(|| {
            Error::Configuration(format!("window {idx} out of range (len {})", self.windows.len()))
        })?;
        tracing::debug!(window = idx, ids = ?window.ids, "loading window");
        self.load_window(window)
    }

    /// Every window in order, each loaded on demand.
    pub fn iter(&self) -> impl Iterator<Item = Result<Sequence>> + '_ {
        (0..self.windows.len()).map(move |i| self.get(i))
    }

    /// Stack several windows into `[B, T, C, H, W]`.
    pub fn batch(&self, indices: &[usize]) -> Result<Batch> {
        if indices.is_empty() {
            return Err(Error::Configuration("empty batch".into()));
        }
        let seqs = indices.iter().map(|&i| self.get(i)).collect::<Result<Vec<_>>>()?;
        let first = seqs[0].dim();
        let views: Vec<_> = seqs.iter().map(|s| s.view()).collect();
        stack(Axis(0), &views).map_err(|e| Error::shape("batch stack", first, e.to_string()))
    }

    /// Build every window concurrently. The first failure is returned.
    pub fn materialize_parallel(&self) -> Result<Vec<Sequence>> {
        self.ensure_non_empty()?;
        self.windows.par_iter().map(|w| self.load_window(w)).collect()
    }
}

/// Build all windows of `source` sequentially.
///
/// Unlike `SequenceDataset::new`, an empty result is an `InsufficientData`
/// error.
pub fn build<S: RasterSource>(source: S, spec: WindowSpec) -> Result<Vec<Sequence>> {
    let dataset = SequenceDataset::new(source, spec)?;
    dataset.ensure_non_empty()?;
    dataset.iter().collect()
}
