//! Core data models shared by the cache manager and its collaborators.
//!
//! These types describe what flows through a rebuild: the source files of
//! a subject, the chunks cut from them, and the per-chunk records that are
//! persisted next to the vectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One tracked file of a subject, read fresh from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the subject directory, `/` separated.
    pub path: String,
    /// Full file content.
    pub bytes: Vec<u8>,
    /// Last-modified marker, when the filesystem reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Hex SHA-256 of `bytes`.
    pub content_hash: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>, modified: Option<DateTime<Utc>>) -> Self {
        let content_hash = sha256_hex(&bytes);
        Self {
            path: path.into(),
            bytes,
            modified,
            content_hash,
        }
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        name.rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    pub fn digest(&self) -> SourceFileDigest {
        SourceFileDigest {
            path: self.path.clone(),
            size: self.bytes.len() as u64,
            sha256: self.content_hash.clone(),
            modified: self.modified,
        }
    }
}

/// The files under one subject's curriculum folder, in canonical order.
#[derive(Debug, Clone)]
pub struct SourceDocumentSet {
    pub subject: String,
    /// Sorted by `path`.
    pub files: Vec<SourceFile>,
}

impl SourceDocumentSet {
    /// Builds a set, sorting files into canonical (path) order.
    pub fn new(subject: impl Into<String>, mut files: Vec<SourceFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            subject: subject.into(),
            files,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn digests(&self) -> Vec<SourceFileDigest> {
        self.files.iter().map(SourceFile::digest).collect()
    }
}

/// Per-file entry of the artifact manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileDigest {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// A segment of source text, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Relative path of the source file.
    pub source: String,
    /// Human-readable position inside the source (`page 3`, `section 1`).
    pub locator: String,
    /// Contiguous index of the chunk inside its source file.
    pub chunk_index: usize,
    pub text: String,
    /// Hex SHA-256 of `text`.
    pub hash: String,
}

/// Persisted payload for one row of the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Row of the vector this record belongs to.
    pub row: usize,
    pub source: String,
    pub locator: String,
    pub text: String,
    pub hash: String,
}

impl ChunkRecord {
    pub fn from_chunk(row: usize, chunk: Chunk) -> Self {
        Self {
            row,
            source: chunk.source,
            locator: chunk.locator,
            text: chunk.text,
            hash: chunk.hash,
        }
    }
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
