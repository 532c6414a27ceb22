//! Edge-list CSV: `u,v,w`, one row per adjacency entry in stored order.
//!
//! ```text
//! u,v,w
//! 0,1,0.1
//! 0,3,0.3
//! ```

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::SparseAdjacency;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct EdgeRow {
    u: usize,
    v: usize,
    w: f32,
}

pub fn write_edges_csv<W: Write>(adjacency: &SparseAdjacency, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for (u, v, w) in adjacency.iter() {
        out.serialize(EdgeRow { u, v, w })?;
    }
    if adjacency.nnz() == 0 {
        out.write_record(["u", "v", "w"])?;
    }
    out.flush()?;
    Ok(())
}

/// Parse an edge list for a graph of `n` nodes.
pub fn read_edges_csv<R: Read>(reader: R, n: usize) -> Result<SparseAdjacency> {
    let mut input = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers = input.headers()?.clone();
    if headers.iter().collect::<Vec<_>>() != ["u", "v", "w"] {
        return Err(Error::Parse {
            what: "edge csv",
            line: 1,
            message: format!("expected header u,v,w, got {}", headers.iter().collect::<Vec<_>>().join(",")),
        });
    }

    let (mut rows, mut cols, mut weights) = (Vec::new(), Vec::new(), Vec::new());
    for (idx, record) in input.deserialize::<EdgeRow>().enumerate() {
        let row = record.map_err(|e| Error::Parse {
            what: "edge csv",
            line: idx + 2,
            message: e.to_string(),
        })?;
        rows.push(row.u);
        cols.push(row.v);
        weights.push(row.w);
    }
    SparseAdjacency::new(n, rows, cols, weights)
}

pub fn save_edges_csv(adjacency: &SparseAdjacency, path: impl AsRef<Path>) -> Result<()> {
    write_edges_csv(adjacency, std::fs::File::create(path)?)
}

pub fn load_edges_csv(path: impl AsRef<Path>, n: usize) -> Result<SparseAdjacency> {
    read_edges_csv(std::fs::File::open(path)?, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProbabilityMap;
    use pretty_assertions::assert_eq;

    fn adjacency() -> SparseAdjacency {
        let map = ProbabilityMap::from_vec(2, 2, vec![0.0, 0.2, 0.6, 0.8]).unwrap();
        SparseAdjacency::from_prob_map(&map, true)
    }

    #[test]
    fn test_header_and_first_rows() {
        let mut buf = Vec::new();
        write_edges_csv(&adjacency(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().take(3).collect();
        assert_eq!(lines, vec!["u,v,w", "0,1,0.1", "1,0,0.1"]);
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let mut buf = Vec::new();
        write_edges_csv(&adjacency(), &mut buf).unwrap();
        let back = read_edges_csv(buf.as_slice(), 4).unwrap();
        assert_eq!(back, adjacency());
    }

    #[test]
    fn test_empty_adjacency_still_has_header() {
        let empty = SparseAdjacency::new(1, vec![], vec![], vec![]).unwrap();
        let mut buf = Vec::new();
        write_edges_csv(&empty, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "u,v,w\n");
        assert_eq!(read_edges_csv("u,v,w\n".as_bytes(), 1).unwrap(), empty);
    }

    #[test]
    fn test_bad_rows() {
        let err = read_edges_csv("u,v,w\n0,1,0.5\n0,x,0.5\n".as_bytes(), 2).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, .. }));
        assert!(read_edges_csv("a,b,c\n".as_bytes(), 2).is_err());
        assert!(read_edges_csv("u,v,w\n0,5,0.5\n".as_bytes(), 2).is_err());
    }
}
