//! Pixel node: one grid cell of the probability map.

use serde::{Deserialize, Serialize};
use super::AttrValue;

/// Row-major cell identifier, `y * width + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn from_cell(x: usize, y: usize, width: usize) -> Self {
        NodeId((y * width + x) as u64)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in the pixel graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelNode {
    pub id: NodeId,
    /// Column of the cell.
    pub x: u32,
    /// Row of the cell.
    pub y: u32,
    pub probability: f32,
}

impl PixelNode {
    pub fn new(id: NodeId, x: u32, y: u32, probability: f32) -> Self {
        Self { id, x, y, probability }
    }

    /// The three scalar attributes, in serialization order.
    pub fn attributes(&self) -> [(&'static str, AttrValue); 3] {
        [
            ("x", AttrValue::from(self.x)),
            ("y", AttrValue::from(self.y)),
            ("probability", AttrValue::from(self.probability)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_cell() {
        assert_eq!(NodeId::from_cell(2, 1, 3), NodeId(5));
        assert_eq!(NodeId(7).index(), 7);
    }

    #[test]
    fn test_attributes_are_scalars() {
        let node = PixelNode::new(NodeId(4), 1, 1, 0.8);
        let attrs = node.attributes();
        assert_eq!(attrs[0], ("x", AttrValue::Int(1)));
        assert_eq!(attrs[1], ("y", AttrValue::Int(1)));
        assert_eq!(attrs[2].0, "probability");
    }
}
