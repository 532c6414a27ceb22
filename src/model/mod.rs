//! # Forecast Data Model
//!
//! Clean DTOs that every stage of the pipeline exchanges:
//! raster frames, probability maps and the pixel graph built from them.
//!
//! Design rule: NO raster-source types, NO file formats here.
//! This module is pure data with no I/O and no threads.

pub mod frame;
pub mod prob_map;
pub mod value;
pub mod node;
pub mod edge;
pub mod graph;

pub use frame::{Frame, Sequence, Batch, sanitize, frame_shape};
pub use prob_map::ProbabilityMap;
pub use value::AttrValue;
pub use node::{PixelNode, NodeId};
pub use edge::{PixelEdge, Direction};
pub use graph::PixelGraph;
