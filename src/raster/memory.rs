//! In-memory raster source.
//!
//! This is the reference implementation of `RasterSource`.
//! Frames live in a `HashMap` protected by a `RwLock`.
//!
//! ## Limitations
//!
//! - **No lazy decoding**: `open()` clones the whole frame.
//! - **Failure injection only by id**: `mark_unreadable()` makes `open()`
//!   fail for one identifier, which is how tests exercise I/O propagation.
//!
//! Use this source for:
//! - Testing the dataset, model and graph stages without files
//! - Embedding the pipeline behind an application that already decoded rasters

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::Frame;
use crate::{Error, Result};
use super::{select_bands, BandSelection, RasterHandle, RasterSource, SourceCapabilities};

// ============================================================================
// MemorySource
// ============================================================================

/// In-memory raster storage.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    frames: RwLock<HashMap<String, Frame>>,
    unreadable: RwLock<HashSet<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, frame)` pairs.
    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = (S, Frame)>,
        S: Into<String>,
    {
        let source = Self::new();
        for (id, frame) in frames {
            source.insert(id, frame);
        }
        source
    }

    /// Insert or replace a frame.
    pub fn insert(&self, id: impl Into<String>, frame: Frame) {
        self.inner.frames.write().insert(id.into(), frame);
    }

    /// Make every subsequent `open(id)` fail.
    pub fn mark_unreadable(&self, id: impl Into<String>) {
        self.inner.unreadable.write().insert(id.into());
    }

    pub fn len(&self) -> usize {
        self.inner.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.frames.read().is_empty()
    }
}

// ============================================================================
// MemoryHandle
// ============================================================================

/// An opened in-memory raster (owns a copy of the frame).
pub struct MemoryHandle {
    frame: Frame,
}

impl RasterHandle for MemoryHandle {
    fn band_count(&self) -> usize {
        self.frame.dim().0
    }

    fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.frame.dim();
        (h, w)
    }

    fn read(&self, bands: &BandSelection) -> Result<Frame> {
        select_bands(&self.frame, bands)
    }
}

// ============================================================================
// RasterSource impl
// ============================================================================

impl RasterSource for MemorySource {
    type Handle = MemoryHandle;

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.inner.frames.read().keys().cloned().collect())
    }

    fn open(&self, id: &str) -> Result<MemoryHandle> {
        if self.inner.unreadable.read().contains(id) {
            return Err(Error::RasterUnreadable {
                id: id.to_string(),
                reason: "marked unreadable".into(),
            });
        }
        let frames = self.inner.frames.read();
        let frame = frames.get(id).cloned().ok_or_else(|| Error::RasterUnreadable {
            id: id.to_string(),
            reason: "no such raster".into(),
        })?;
        Ok(MemoryHandle { frame })
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            concurrent_reads: true,
            lazy_decode: false,
            extensions: Vec::new(),
        }
    }
}
