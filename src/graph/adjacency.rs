//! Sparse adjacency: the matrix view of a pixel graph.
//!
//! Coordinate form keeps the graph's edge order. `to_csr` groups entries by
//! row with a stable sort, so entries of one row keep their relative order
//! and `from_csr(to_csr(a))` is `a` whenever `a` was already row-grouped.

use serde::{Deserialize, Serialize};

use super::builder::{expected_edge_count, neighbour_pairs};
use crate::model::{NodeId, PixelEdge, PixelGraph, PixelNode, ProbabilityMap};
use crate::{Error, Result};

/// `N × N` weighted adjacency in coordinate (COO) form.
///
/// Every row and column index is `< N`; construction and deserialization
/// both go through [`SparseAdjacency::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AdjacencyParts")]
pub struct SparseAdjacency {
    shape: (usize, usize),
    rows: Vec<usize>,
    cols: Vec<usize>,
    weights: Vec<f32>,
}

/// Unchecked wire form of [`SparseAdjacency`].
#[derive(Deserialize)]
struct AdjacencyParts {
    shape: (usize, usize),
    rows: Vec<usize>,
    cols: Vec<usize>,
    weights: Vec<f32>,
}

impl TryFrom<AdjacencyParts> for SparseAdjacency {
    type Error = Error;

    fn try_from(parts: AdjacencyParts) -> Result<Self> {
        let (n, m) = parts.shape;
        if n != m {
            return Err(Error::shape("adjacency shape", "square", parts.shape));
        }
        Self::new(n, parts.rows, parts.cols, parts.weights)
    }
}

/// Compressed sparse row arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    /// `n_rows + 1` offsets into `indices`/`data`.
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub data: Vec<f32>,
}

impl CsrMatrix {
    pub fn nnz(&self) -> usize {
        self.data.len()
    }
}

impl SparseAdjacency {
    pub fn new(n: usize, rows: Vec<usize>, cols: Vec<usize>, weights: Vec<f32>) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != weights.len() {
            return Err(Error::shape(
                "adjacency triplets",
                rows.len(),
                (cols.len(), weights.len()),
            ));
        }
        if let Some(&bad) = rows.iter().chain(cols.iter()).find(|&&i| i >= n) {
            return Err(Error::shape("adjacency index", format!("< {n}"), bad));
        }
        Ok(Self { shape: (n, n), rows, cols, weights })
    }

    pub fn node_count(&self) -> usize {
        self.shape.0
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn nnz(&self) -> usize {
        self.weights.len()
    }

    pub fn from_graph(graph: &PixelGraph) -> Self {
        let edges = graph.edges();
        Self {
            shape: (graph.node_count(), graph.node_count()),
            rows: edges.iter().map(|e| e.src.index()).collect(),
            cols: edges.iter().map(|e| e.dst.index()).collect(),
            weights: edges.iter().map(|e| e.weight).collect(),
        }
    }

    /// Same entries as `from_graph(transform(map, bidirectional))` without
    /// materializing the node list.
    pub fn from_prob_map(map: &ProbabilityMap, bidirectional: bool) -> Self {
        let (h, w) = (map.height(), map.width());
        let probs = map.to_flat();
        let cap = expected_edge_count(h, w, bidirectional);
        let mut rows = Vec::with_capacity(cap);
        let mut cols = Vec::with_capacity(cap);
        let mut weights = Vec::with_capacity(cap);
        for (a, b) in neighbour_pairs(h, w) {
            let weight = (probs[a] + probs[b]) / 2.0;
            rows.push(a);
            cols.push(b);
            weights.push(weight);
            if bidirectional {
                rows.push(b);
                cols.push(a);
                weights.push(weight);
            }
        }
        Self { shape: (h * w, h * w), rows, cols, weights }
    }

    /// Rebuild the pixel graph, taking node attributes from `map`.
    pub fn to_pixel_graph(&self, map: &ProbabilityMap) -> Result<PixelGraph> {
        if map.len() != self.node_count() {
            return Err(Error::shape("adjacency vs probability map", self.node_count(), map.len()));
        }
        let width = map.width();
        let nodes = (0..map.len())
            .map(|i| {
                let (y, x) = (i / width, i % width);
                PixelNode::new(NodeId(i as u64), x as u32, y as u32, map.get(y, x))
            })
            .collect();
        let edges = self
            .iter()
            .map(|(r, c, w)| PixelEdge::new(NodeId(r as u64), NodeId(c as u64), w))
            .collect();
        PixelGraph::from_parts(width, map.height(), nodes, edges)
    }

    /// `(row, col, weight)` triplets in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.rows
            .iter()
            .zip(self.cols.iter())
            .zip(self.weights.iter())
            .map(|((&r, &c), &w)| (r, c, w))
    }

    pub fn to_csr(&self) -> CsrMatrix {
        let (n_rows, n_cols) = self.shape;
        let mut order: Vec<usize> = (0..self.nnz()).collect();
        order.sort_by_key(|&i| self.rows[i]);

        let mut indptr = vec![0usize; n_rows + 1];
        for &r in &self.rows {
            indptr[r + 1] += 1;
        }
        for i in 0..n_rows {
            indptr[i + 1] += indptr[i];
        }

        CsrMatrix {
            n_rows,
            n_cols,
            indptr,
            indices: order.iter().map(|&i| self.cols[i]).collect(),
            data: order.iter().map(|&i| self.weights[i]).collect(),
        }
    }

    pub fn from_csr(csr: &CsrMatrix) -> Result<Self> {
        if csr.n_rows != csr.n_cols {
            return Err(Error::shape("csr matrix", "square", (csr.n_rows, csr.n_cols)));
        }
        if csr.indptr.len() != csr.n_rows + 1 || csr.indices.len() != csr.data.len() {
            return Err(Error::shape(
                "csr arrays",
                (csr.n_rows + 1, csr.data.len()),
                (csr.indptr.len(), csr.indices.len()),
            ));
        }
        if csr.indptr.first() != Some(&0)
            || csr.indptr.last() != Some(&csr.nnz())
            || csr.indptr.windows(2).any(|w| w[0] > w[1])
        {
            return Err(Error::shape("csr indptr", "non-decreasing offsets ending at nnz", &csr.indptr));
        }
        let mut rows = Vec::with_capacity(csr.nnz());
        for r in 0..csr.n_rows {
            rows.extend(std::iter::repeat_n(r, csr.indptr[r + 1] - csr.indptr[r]));
        }
        Self::new(csr.n_rows, rows, csr.indices.clone(), csr.data.clone())
    }
}
