//! Binary CSR adjacency files.
//!
//! Little-endian layout:
//!
//! ```text
//! "FGCSR" | version: u32 | n_rows: u64 | n_cols: u64 | nnz: u64
//! indptr: u64 × (n_rows + 1) | indices: u64 × nnz | data: f32 × nnz
//! ```
//!
//! Compiled only with the `csr` feature; without it every call returns
//! `Error::FormatUnavailable`, which is what triggers the CSV fallback.

use std::path::Path;

use crate::graph::{CsrMatrix, SparseAdjacency};
use crate::Result;

pub const MAGIC: &[u8; 5] = b"FGCSR";
pub const VERSION: u32 = 1;

#[cfg(feature = "csr")]
mod codec {
    use bytes::{Buf, BufMut, Bytes, BytesMut};

    use super::{MAGIC, VERSION};
    use crate::graph::CsrMatrix;
    use crate::{Error, Result};

    const HEADER_LEN: usize = 5 + 4 + 8 * 3;

    pub fn encode(csr: &CsrMatrix) -> Bytes {
        let len = HEADER_LEN + 8 * (csr.indptr.len() + csr.indices.len()) + 4 * csr.data.len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u64_le(csr.n_rows as u64);
        buf.put_u64_le(csr.n_cols as u64);
        buf.put_u64_le(csr.nnz() as u64);
        for &p in &csr.indptr {
            buf.put_u64_le(p as u64);
        }
        for &i in &csr.indices {
            buf.put_u64_le(i as u64);
        }
        for &d in &csr.data {
            buf.put_f32_le(d);
        }
        buf.freeze()
    }

    fn corrupt(message: impl Into<String>) -> Error {
        Error::Parse { what: "csr", line: 0, message: message.into() }
    }

    fn take_u64s(buf: &mut Bytes, n: usize, what: &str) -> Result<Vec<usize>> {
        if buf.remaining() < n.saturating_mul(8) {
            return Err(corrupt(format!("truncated {what}")));
        }
        Ok((0..n).map(|_| buf.get_u64_le() as usize).collect())
    }

    pub fn decode(mut buf: Bytes) -> Result<CsrMatrix> {
        if buf.remaining() < HEADER_LEN {
            return Err(corrupt("file shorter than header"));
        }
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        buf.advance(MAGIC.len());
        let version = buf.get_u32_le();
        if version != VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        let n_rows = buf.get_u64_le() as usize;
        let n_cols = buf.get_u64_le() as usize;
        let nnz = buf.get_u64_le() as usize;

        let indptr = take_u64s(&mut buf, n_rows.saturating_add(1), "indptr")?;
        let indices = take_u64s(&mut buf, nnz, "indices")?;
        if buf.remaining() != nnz.saturating_mul(4) {
            return Err(corrupt(format!("expected {nnz} values, {} bytes left", buf.remaining())));
        }
        let data = (0..nnz).map(|_| buf.get_f32_le()).collect();
        Ok(CsrMatrix { n_rows, n_cols, indptr, indices, data })
    }
}

#[cfg(feature = "csr")]
pub fn write_csr(adjacency: &SparseAdjacency, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, codec::encode(&adjacency.to_csr()))?;
    Ok(())
}

#[cfg(feature = "csr")]
pub fn read_csr(path: impl AsRef<Path>) -> Result<SparseAdjacency> {
    let csr = read_csr_matrix(path)?;
    SparseAdjacency::from_csr(&csr)
}

#[cfg(feature = "csr")]
pub fn read_csr_matrix(path: impl AsRef<Path>) -> Result<CsrMatrix> {
    codec::decode(bytes::Bytes::from(std::fs::read(path)?))
}

#[cfg(not(feature = "csr"))]
pub fn write_csr(_adjacency: &SparseAdjacency, _path: impl AsRef<Path>) -> Result<()> {
    Err(crate::Error::FormatUnavailable("csr"))
}

#[cfg(not(feature = "csr"))]
pub fn read_csr(_path: impl AsRef<Path>) -> Result<SparseAdjacency> {
    Err(crate::Error::FormatUnavailable("csr"))
}

#[cfg(not(feature = "csr"))]
pub fn read_csr_matrix(_path: impl AsRef<Path>) -> Result<CsrMatrix> {
    Err(crate::Error::FormatUnavailable("csr"))
}

#[cfg(all(test, feature = "csr"))]
mod tests {
    use super::*;
    use crate::model::ProbabilityMap;
    use crate::Error;

    fn adjacency() -> SparseAdjacency {
        let map = ProbabilityMap::from_vec(3, 3, (0..9).map(|i| i as f32 / 8.0).collect()).unwrap();
        SparseAdjacency::from_prob_map(&map, false)
    }

    #[test]
    fn test_header_layout() {
        let bytes = codec::encode(&adjacency().to_csr());
        assert_eq!(&bytes[..5], b"FGCSR");
        assert_eq!(u32::from_le_bytes(bytes[5..9].try_into().unwrap()), VERSION);
        assert_eq!(u64::from_le_bytes(bytes[25..33].try_into().unwrap()), 20);
        assert_eq!(bytes.len(), 33 + 8 * 10 + 8 * 20 + 4 * 20);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adj.csr");
        write_csr(&adjacency(), &path).unwrap();
        assert_eq!(read_csr(&path).unwrap(), adjacency());
    }

    #[test]
    fn test_corrupt_files_rejected() {
        let good = codec::encode(&adjacency().to_csr());

        let mut bad_magic = good.to_vec();
        bad_magic[0] = b'X';
        assert!(matches!(codec::decode(bad_magic.into()), Err(Error::Parse { what: "csr", .. })));

        let truncated = good.slice(..good.len() - 3);
        assert!(codec::decode(truncated).is_err());
        assert!(codec::decode(bytes::Bytes::from_static(b"FG")).is_err());
    }
}
