//! Directed, weighted edge between two pixel nodes.

use serde::{Deserialize, Serialize};
use super::NodeId;

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A directed edge of the pixel graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelEdge {
    pub src: NodeId,
    pub dst: NodeId,
    /// Mean of the two endpoint probabilities.
    pub weight: f32,
}

impl PixelEdge {
    pub fn new(src: NodeId, dst: NodeId, weight: f32) -> Self {
        Self { src, dst, weight }
    }

    /// The same edge pointing the other way.
    pub fn reversed(&self) -> Self {
        Self { src: self.dst, dst: self.src, weight: self.weight }
    }
}
