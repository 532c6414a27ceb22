//! Pixel graph: grid cells as nodes, local neighbourhoods as weighted edges.

use serde::{Deserialize, Serialize};

use super::{Direction, NodeId, PixelEdge, PixelNode};
use crate::{Error, Result};

/// A directed weighted graph over the cells of an `H × W` grid.
///
/// Nodes are stored densely by id (`nodes[i].id == NodeId(i)`). Edges keep
/// their insertion order; the adjacency index holds edge positions per node.
/// The index is never serialized: deserialization rebuilds it through
/// [`PixelGraph::from_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphParts")]
pub struct PixelGraph {
    width: usize,
    height: usize,
    nodes: Vec<PixelNode>,
    edges: Vec<PixelEdge>,
    /// node index → positions in `edges` where the node is `src`
    #[serde(skip_serializing)]
    outgoing: Vec<Vec<usize>>,
    /// node index → positions in `edges` where the node is `dst`
    #[serde(skip_serializing)]
    incoming: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct GraphParts {
    width: usize,
    height: usize,
    nodes: Vec<PixelNode>,
    edges: Vec<PixelEdge>,
}

impl TryFrom<GraphParts> for PixelGraph {
    type Error = Error;

    fn try_from(parts: GraphParts) -> Result<Self> {
        Self::from_parts(parts.width, parts.height, parts.nodes, parts.edges)
    }
}

impl PixelGraph {
    /// Assemble a graph, checking that node ids are dense and every edge
    /// endpoint exists.
    pub fn from_parts(
        width: usize,
        height: usize,
        nodes: Vec<PixelNode>,
        edges: Vec<PixelEdge>,
    ) -> Result<Self> {
        let n = width * height;
        if nodes.len() != n {
            return Err(Error::shape("pixel graph nodes", n, nodes.len()));
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.id.index() != i {
                return Err(Error::shape("pixel graph node id", i, node.id));
            }
        }

        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        for (pos, edge) in edges.iter().enumerate() {
            let (s, d) = (edge.src.index(), edge.dst.index());
            if s >= n || d >= n {
                return Err(Error::shape(
                    "pixel graph edge endpoint",
                    format!("< {n}"),
                    (edge.src.0, edge.dst.0),
                ));
            }
            outgoing[s].push(pos);
            incoming[d].push(pos);
        }

        Ok(Self { width, height, nodes, edges, outgoing, incoming })
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.edges.len() }

    pub fn nodes(&self) -> &[PixelNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[PixelEdge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&PixelNode> {
        self.nodes.get(id.index())
    }

    /// Edges touching `id` in the given direction, in insertion order.
    pub fn edges_of(&self, id: NodeId, dir: Direction) -> Vec<&PixelEdge> {
        let i = id.index();
        if i >= self.nodes.len() {
            return Vec::new();
        }
        let positions: Box<dyn Iterator<Item = &usize>> = match dir {
            Direction::Outgoing => Box::new(self.outgoing[i].iter()),
            Direction::Incoming => Box::new(self.incoming[i].iter()),
            Direction::Both => Box::new(self.outgoing[i].iter().chain(self.incoming[i].iter())),
        };
        positions.map(|&p| &self.edges[p]).collect()
    }

    /// Weight of the edge `src → dst`, if present.
    pub fn weight(&self, src: NodeId, dst: NodeId) -> Option<f32> {
        self.outgoing
            .get(src.index())?
            .iter()
            .map(|&p| &self.edges[p])
            .find(|e| e.dst == dst)
            .map(|e| e.weight)
    }

    /// Node probabilities in id order.
    pub fn probabilities(&self) -> Vec<f32> {
        self.nodes.iter().map(|n| n.probability).collect()
    }
}
