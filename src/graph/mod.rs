//! # Pixel Graph Construction
//!
//! | Module | Contents |
//! |--------|----------|
//! | `builder` | `ProbabilityMap` → `PixelGraph` over the 4-offset neighbourhood |
//! | `adjacency` | COO/CSR sparse adjacency, lossless to and from the graph |
//! | `analysis` | Node/edge statistics |
//!
//! ```text
//!  (y,x) ──► (y,x+1)        right
//!    │  ╲
//!    │    ╲──► (y+1,x+1)    down-right
//!    ▼
//!  (y+1,x)                  down
//!  (y+1,x-1) ◄── (y,x)      down-left
//! ```

pub mod builder;
pub mod adjacency;
pub mod analysis;

pub use builder::{expected_edge_count, transform, NEIGHBOR_OFFSETS};
pub use adjacency::{CsrMatrix, SparseAdjacency};
pub use analysis::{GraphStats, HIGH_THRESHOLD, LIKELY_THRESHOLD};
