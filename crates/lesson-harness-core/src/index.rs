//! In-memory vector index.
//!
//! [`FlatIndex`] keeps every vector in one contiguous row-major buffer and
//! answers queries by brute-force cosine similarity. Subject corpora are a
//! few hundred to a few thousand chunks, well inside the range where an
//! exact scan is fast enough.
//!
//! The on-disk encoding is a small fixed header followed by the raw
//! little-endian `f32` values:
//!
//! ```text
//! magic "LHVX" | version u32 | dims u32 | rows u32 | rows × dims × f32
//! ```

use anyhow::{bail, Result};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

const MAGIC: &[u8; 4] = b"LHVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// One scored row returned by a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Row of the vector in the index.
    pub row: usize,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Read-only nearest-neighbour lookup over fixed-dimension vectors.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;
    fn dims(&self) -> usize;
    /// Return at most `k` hits, best first. Ties are ordered by row.
    fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build an index from one vector per row.
    ///
    /// Fails if any vector's length differs from `dims` or any value is
    /// NaN or infinite, matching what [`FlatIndex::from_bytes`] accepts.
    pub fn build(dims: usize, vectors: &[Vec<f32>]) -> Result<Self> {
        if dims == 0 {
            bail!("index dimensionality must be positive");
        }
        let mut data = Vec::with_capacity(vectors.len() * dims);
        for (row, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                bail!("vector {} has {} dims, expected {}", row, v.len(), dims);
            }
            if v.iter().any(|x| !x.is_finite()) {
                bail!("vector {} contains non-finite values", row);
            }
            data.extend_from_slice(v);
        }
        Ok(Self { dims, data })
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(&vec_to_blob(&self.data));
        out
    }

    /// Decode an index written by [`FlatIndex::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("vector file truncated: {} bytes", bytes.len());
        }
        if &bytes[0..4] != MAGIC {
            bail!("vector file has wrong magic");
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            bail!("unsupported vector file version {}", version);
        }
        let dims = read_u32(&bytes[8..12]) as usize;
        let rows = read_u32(&bytes[12..16]) as usize;
        if dims == 0 {
            bail!("vector file declares zero dims");
        }

        let body = &bytes[HEADER_LEN..];
        let expected = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| anyhow::anyhow!("vector file header overflows"))?;
        if body.len() != expected {
            bail!(
                "vector file body is {} bytes, header implies {}",
                body.len(),
                expected
            );
        }

        let data = blob_to_vec(body);
        if data.iter().any(|v| !v.is_finite()) {
            bail!("vector file contains non-finite values");
        }
        Ok(Self { dims, data })
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.data.len() / self.dims
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || query.len() != self.dims {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(row, v)| SearchHit {
                row,
                score: cosine_similarity(query, v),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        hits.truncate(k);
        hits
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        FlatIndex::build(
            3,
            &[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
                vec![1.0, 0.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_build_rejects_dimension_mismatch() {
        let err = FlatIndex::build(3, &[vec![1.0, 0.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(err.to_string().contains("vector 1"));
        assert!(FlatIndex::build(0, &[]).is_err());
    }

    #[test]
    fn test_build_rejects_non_finite_values() {
        let err = FlatIndex::build(2, &[vec![1.0, 0.0], vec![f32::NAN, 1.0]]).unwrap_err();
        assert!(err.to_string().contains("vector 1"), "{}", err);
        assert!(FlatIndex::build(2, &[vec![f32::INFINITY, 0.0]]).is_err());
    }

    #[test]
    fn test_search_orders_by_score_then_row() {
        let idx = sample();
        let hits = idx.search(&[1.0, 0.0, 0.0], 3);
        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 3, 2]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_k_larger_than_len_and_zero() {
        let idx = sample();
        assert_eq!(idx.search(&[0.0, 1.0, 0.0], 10).len(), 4);
        assert!(idx.search(&[0.0, 1.0, 0.0], 0).is_empty());
        assert!(idx.search(&[0.0, 1.0], 2).is_empty());
    }

    #[test]
    fn test_bytes_roundtrip_preserves_rows() {
        let idx = sample();
        let back = FlatIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(back, idx);
        assert_eq!(back.len(), 4);
        assert_eq!(back.row(2), Some(&[0.7f32, 0.7, 0.0][..]));
        assert_eq!(back.row(4), None);
    }

    #[test]
    fn test_from_bytes_rejects_damage() {
        let bytes = sample().to_bytes();

        assert!(FlatIndex::from_bytes(&bytes[..10]).is_err());
        assert!(FlatIndex::from_bytes(&bytes[..bytes.len() - 4]).is_err());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(FlatIndex::from_bytes(&bad_magic).is_err());

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert!(FlatIndex::from_bytes(&bad_version).is_err());

        let mut nan = bytes.clone();
        nan[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&f32::NAN.to_le_bytes());
        assert!(FlatIndex::from_bytes(&nan).is_err());
    }

    #[test]
    fn test_empty_index() {
        let idx = FlatIndex::build(4, &[]).unwrap();
        assert!(idx.is_empty());
        assert!(idx.search(&[1.0, 0.0, 0.0, 0.0], 3).is_empty());
        let back = FlatIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(back.dims(), 4);
    }
}
