//! # Graph Export
//!
//! Writes forecast graphs in formats downstream tools load directly.
//!
//! | Format | Module | Notes |
//! |--------|--------|-------|
//! | GraphML | `graphml` | Nodes with `x`, `y`, `probability`; edges with `weight` |
//! | Binary CSR | `sparse` | Feature `csr` (default) |
//! | Edge-list CSV | `csv_edges` | `u,v,w`; fallback when CSR is compiled out |
//! | Node probabilities | here | Flat JSON array, index = node id |
//! | Arrow | `arrow` | Feature `arrow-results` |
//!
//! ```text
//! SparseAdjacency → save_adjacency() → adjacency_seq_N.csr
//!                                    └► adjacency_seq_N_edges.csv  (csr unavailable)
//! ```

pub mod graphml;
pub mod sparse;
pub mod csv_edges;
#[cfg(feature = "arrow-results")]
pub mod arrow;

use std::fs;
use std::path::{Path, PathBuf};

use crate::graph::SparseAdjacency;
use crate::{Error, Result};

pub use graphml::{load_graphml, read_graphml, save_graphml, write_graphml};
pub use sparse::{read_csr, write_csr};
pub use csv_edges::{load_edges_csv, read_edges_csv, save_edges_csv, write_edges_csv};
#[cfg(feature = "arrow-results")]
pub use arrow::{adjacency_schema, adjacency_to_record_batch};

/// Where an adjacency ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedAdjacency {
    Csr(PathBuf),
    Csv(PathBuf),
}

impl SavedAdjacency {
    pub fn path(&self) -> &Path {
        match self {
            SavedAdjacency::Csr(p) | SavedAdjacency::Csv(p) => p,
        }
    }
}

/// Save as CSR, or as an edge-list CSV when the CSR format is compiled out.
/// Any other CSR failure is returned as is.
pub fn save_adjacency(
    adjacency: &SparseAdjacency,
    csr_path: impl AsRef<Path>,
    csv_path: impl AsRef<Path>,
) -> Result<SavedAdjacency> {
    match write_csr(adjacency, csr_path.as_ref()) {
        Ok(()) => Ok(SavedAdjacency::Csr(csr_path.as_ref().to_path_buf())),
        Err(Error::FormatUnavailable(format)) => {
            tracing::warn!(format, path = %csv_path.as_ref().display(), "falling back to edge-list CSV");
            save_edges_csv(adjacency, csv_path.as_ref())?;
            Ok(SavedAdjacency::Csv(csv_path.as_ref().to_path_buf()))
        }
        Err(e) => Err(e),
    }
}

/// Read back whatever `save_adjacency` wrote. CSV needs the node count.
pub fn load_adjacency(saved: &SavedAdjacency, n: usize) -> Result<SparseAdjacency> {
    match saved {
        SavedAdjacency::Csr(p) => read_csr(p),
        SavedAdjacency::Csv(p) => load_edges_csv(p, n),
    }
}

pub fn save_node_probabilities(probabilities: &[f32], path: impl AsRef<Path>) -> Result<()> {
    fs::write(path, serde_json::to_vec(probabilities)?)?;
    Ok(())
}

pub fn load_node_probabilities(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}
