//! Active-fire hotspots: cells of a detection band above a threshold.
//!
//! Coordinates are pixel `(row, col)`; mapping them to geographic
//! coordinates belongs to whoever owns the raster's transform.

use serde::{Deserialize, Serialize};

use crate::model::Frame;
use crate::raster::{BandSelection, RasterSource};
use crate::{Error, Result};

/// 1-indexed band carrying active-fire detections in the source tiles.
pub const ACTIVE_FIRE_BAND: u16 = 23;

/// Cells of `band` (1-indexed) whose value is strictly above `threshold`,
/// in row-major order. NaN never counts.
pub fn active_cells(frame: &Frame, band: u16, threshold: f32) -> Result<Vec<(usize, usize)>> {
    let channels = frame.dim().0;
    if band == 0 || band as usize > channels {
        return Err(Error::shape("hotspot band", format!("1..={channels}"), band));
    }
    let plane = frame.index_axis(ndarray::Axis(0), band as usize - 1);
    Ok(plane
        .indexed_iter()
        .filter(|&(_, &v)| v > threshold)
        .map(|(pos, _)| pos)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotSummary {
    pub id: String,
    pub cells: Vec<(usize, usize)>,
}

impl HotspotSummary {
    pub fn count(&self) -> usize {
        self.cells.len()
    }
}

/// Hotspots of every raster the source lists, in listing order.
pub fn summarize<S: RasterSource>(source: &S, band: u16, threshold: f32) -> Result<Vec<HotspotSummary>> {
    let mut ids = source.list()?;
    ids.sort();
    ids.into_iter()
        .map(|id| {
            let frame = source.read(&id, &BandSelection::Bands(vec![band]))?;
            let cells = active_cells(&frame, 1, threshold)?;
            tracing::debug!(id = %id, detections = cells.len(), "hotspots extracted");
            Ok(HotspotSummary { id, cells })
        })
        .collect()
}
