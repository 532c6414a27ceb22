//! # Raster Source Trait
//!
//! This is THE contract between the pipeline and wherever raster tiles live.
//! GeoTIFF decoding, object stores and retry policies sit behind it.
//!
//! ## Implementations
//!
//! | Source | Module | Description |
//! |--------|--------|-------------|
//! | `MemorySource` | `memory` | In-memory frames for testing/embedding |
//! | `JsonDirSource` | `json` | Directory of `{shape, data}` JSON frames |
//!
//! Bands are 1-indexed at this boundary, the way raster containers address
//! them. Everything past `RasterHandle::read` is 0-indexed.

pub mod memory;
pub mod json;

use serde::{Deserialize, Serialize};

use crate::model::Frame;
use crate::{Error, Result};

pub use memory::MemorySource;
pub use json::JsonDirSource;

// ============================================================================
// Band selection
// ============================================================================

/// Which bands to read from a raster, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandSelection {
    /// Every band, in file order.
    All,
    /// Explicit bands, in the given order.
    Bands(Vec<u16>),
}

impl BandSelection {
    /// Resolve to 0-based band positions, validating against `band_count`.
    pub fn resolve(&self, band_count: usize) -> Result<Vec<usize>> {
        match self {
            BandSelection::All => Ok((0..band_count).collect()),
            BandSelection::Bands(bands) => bands
                .iter()
                .map(|&b| {
                    if b == 0 || b as usize > band_count {
                        Err(Error::shape("band selection", format!("1..={band_count}"), b))
                    } else {
                        Ok(b as usize - 1)
                    }
                })
                .collect(),
        }
    }
}

// ============================================================================
// Source capabilities
// ============================================================================

/// What a source can do.
///
/// All fields default to false / empty. Sources override via `capabilities()`.
#[derive(Debug, Clone, Default)]
pub struct SourceCapabilities {
    /// Reads of distinct handles may run on different threads.
    pub concurrent_reads: bool,
    /// Frames are decoded lazily at `read`, not at `open`.
    pub lazy_decode: bool,
    /// Extensions `list()` filters on.
    pub extensions: Vec<String>,
}

// ============================================================================
// RasterSource / RasterHandle traits
// ============================================================================

/// An open raster.
pub trait RasterHandle: Send {
    /// Number of bands in the raster.
    fn band_count(&self) -> usize;

    /// `(height, width)` of the raster grid.
    fn shape(&self) -> (usize, usize);

    /// Read the selected bands as a `[C, H, W]` float frame.
    fn read(&self, bands: &BandSelection) -> Result<Frame>;

    /// Release the handle. Default just drops it.
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// The raster storage contract.
///
/// Identifiers are opaque strings; `list()` returns them unsorted and the
/// dataset imposes the temporal order.
pub trait RasterSource: Send + Sync {
    /// The handle type for this source.
    type Handle: RasterHandle;

    /// All raster identifiers this source can open.
    fn list(&self) -> Result<Vec<String>>;

    /// Open a raster by identifier.
    fn open(&self, id: &str) -> Result<Self::Handle>;

    /// Convenience: open, read, close.
    fn read(&self, id: &str, bands: &BandSelection) -> Result<Frame> {
        let handle = self.open(id)?;
        let frame = handle.read(bands)?;
        handle.close()?;
        Ok(frame)
    }

    /// Report what this source can do.
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }
}

/// Copy the selected bands out of a fully decoded frame.
pub(crate) fn select_bands(frame: &Frame, bands: &BandSelection) -> Result<Frame> {
    match bands {
        BandSelection::All => Ok(frame.clone()),
        BandSelection::Bands(_) => {
            let idx = bands.resolve(frame.dim().0)?;
            Ok(frame.select(ndarray::Axis(0), &idx))
        }
    }
}
