//! Read-only summary statistics of a pixel graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::adjacency::SparseAdjacency;
use crate::model::PixelGraph;
use crate::{Error, Result};

/// Probability above which a node counts as likely to burn.
pub const LIKELY_THRESHOLD: f32 = 0.5;
/// Probability above which a node counts as very likely to burn.
pub const HIGH_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub mean_probability: f32,
    pub max_probability: f32,
    pub min_probability: f32,
    /// Nodes with probability strictly above 0.5.
    pub above_0_5: usize,
    /// Nodes with probability strictly above 0.8.
    pub above_0_8: usize,
    pub mean_weight: f32,
}

impl GraphStats {
    pub fn from_graph(graph: &PixelGraph) -> Self {
        let weights: Vec<f32> = graph.edges().iter().map(|e| e.weight).collect();
        Self::compute(&graph.probabilities(), &weights)
    }

    /// From an adjacency plus the node probability vector it was built from.
    pub fn from_adjacency(adjacency: &SparseAdjacency, probabilities: &[f32]) -> Result<Self> {
        if probabilities.len() != adjacency.node_count() {
            return Err(Error::shape(
                "node probabilities",
                adjacency.node_count(),
                probabilities.len(),
            ));
        }
        Ok(Self::compute(probabilities, adjacency.weights()))
    }

    fn compute(probabilities: &[f32], weights: &[f32]) -> Self {
        let mean = |v: &[f32]| {
            if v.is_empty() {
                0.0
            } else {
                (v.iter().map(|&x| f64::from(x)).sum::<f64>() / v.len() as f64) as f32
            }
        };
        let stats = Self {
            nodes: probabilities.len(),
            edges: weights.len(),
            mean_probability: mean(probabilities),
            max_probability: probabilities.iter().copied().reduce(f32::max).unwrap_or(0.0),
            min_probability: probabilities.iter().copied().reduce(f32::min).unwrap_or(0.0),
            above_0_5: probabilities.iter().filter(|&&p| p > LIKELY_THRESHOLD).count(),
            above_0_8: probabilities.iter().filter(|&&p| p > HIGH_THRESHOLD).count(),
            mean_weight: mean(weights),
        };
        tracing::info!(
            nodes = stats.nodes,
            edges = stats.edges,
            mean_probability = stats.mean_probability,
            above_0_5 = stats.above_0_5,
            above_0_8 = stats.above_0_8,
            "graph statistics"
        );
        stats
    }
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} edges, p(mean/min/max)={:.4}/{:.4}/{:.4}, >0.5: {}, >0.8: {}, mean weight {:.4}",
            self.nodes,
            self.edges,
            self.mean_probability,
            self.min_probability,
            self.max_probability,
            self.above_0_5,
            self.above_0_8,
            self.mean_weight,
        )
    }
}
