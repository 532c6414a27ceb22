//! Probability map → pixel graph.
//!
//! Every cell becomes a node; every cell links to its right, down,
//! down-right and down-left neighbour when that neighbour is on the grid.
//! Edge weight is the mean of the two endpoint probabilities.

use crate::model::{NodeId, PixelEdge, PixelGraph, PixelNode, ProbabilityMap};
use crate::Result;

/// `(dy, dx)` neighbour offsets, in edge emission order.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Number of edges `transform` emits for an `h × w` map.
pub fn expected_edge_count(height: usize, width: usize, bidirectional: bool) -> usize {
    if height == 0 || width == 0 {
        return 0;
    }
    let forward = height * (width - 1) + (height - 1) * width + 2 * (height - 1) * (width - 1);
    if bidirectional { 2 * forward } else { forward }
}

/// Cell-centred neighbour walk in row-major order.
pub(crate) fn neighbour_pairs(height: usize, width: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..height).flat_map(move |y| {
        (0..width).flat_map(move |x| {
            NEIGHBOR_OFFSETS.iter().filter_map(move |&(dy, dx)| {
                let ny = y.checked_add_signed(dy)?;
                let nx = x.checked_add_signed(dx)?;
                (ny < height && nx < width).then(|| (y * width + x, ny * width + nx))
            })
        })
    })
}

/// Build the pixel graph of `map`. With `bidirectional`, each forward edge
/// is followed immediately by its reverse carrying the same weight.
pub fn transform(map: &ProbabilityMap, bidirectional: bool) -> Result<PixelGraph> {
    let (height, width) = (map.height(), map.width());
    let probs = map.to_flat();

    let nodes: Vec<PixelNode> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| PixelNode::new(NodeId::from_cell(x, y, width), x as u32, y as u32, map.get(y, x)))
        .collect();

    let mut edges = Vec::with_capacity(expected_edge_count(height, width, bidirectional));
    for (a, b) in neighbour_pairs(height, width) {
        let edge = PixelEdge::new(NodeId(a as u64), NodeId(b as u64), (probs[a] + probs[b]) / 2.0);
        if bidirectional {
            let reverse = edge.reversed();
            edges.push(edge);
            edges.push(reverse);
        } else {
            edges.push(edge);
        }
    }

    tracing::debug!(height, width, edges = edges.len(), bidirectional, "pixel graph built");
    PixelGraph::from_parts(width, height, nodes, edges)
}
