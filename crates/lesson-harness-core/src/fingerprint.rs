//! Content fingerprints of a subject's source documents.
//!
//! A fingerprint is a hex SHA-256 over the canonical (path-sorted) list of
//! files, each contributing its relative path, byte length and content
//! hash. Modification times are deliberately left out: touching a file
//! without changing its bytes must not invalidate a cached index.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{SourceDocumentSet, SourceFileDigest};

/// Bumped whenever the hashing scheme changes, so old artifacts never match.
const FINGERPRINT_VERSION: &[u8] = b"lesson-harness/fingerprint/v1";

/// Opaque digest identifying the exact content of a subject's documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Compute the fingerprint of a document set.
    ///
    /// Files are hashed in path order regardless of the order in `set.files`.
    pub fn compute(set: &SourceDocumentSet) -> Self {
        Self::hash_entries(
            set.files
                .iter()
                .map(|f| (f.path.as_str(), f.bytes.len() as u64, f.content_hash.as_str()))
                .collect(),
        )
    }

    /// Recompute a fingerprint from the per-file digests stored in a manifest.
    ///
    /// Equals [`ContentFingerprint::compute`] over the files those digests
    /// were taken from.
    pub fn from_digests(digests: &[SourceFileDigest]) -> Self {
        Self::hash_entries(
            digests
                .iter()
                .map(|d| (d.path.as_str(), d.size, d.sha256.as_str()))
                .collect(),
        )
    }

    fn hash_entries(mut entries: Vec<(&str, u64, &str)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION);
        for (path, len, content_hash) in entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(len.to_le_bytes());
            hasher.update(content_hash.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a fingerprint previously read from a manifest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
