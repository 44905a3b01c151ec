//! # Lesson Harness Core
//!
//! Shared, I/O-free logic for Lesson Harness: data models, chunking,
//! content fingerprints, the flat vector index, the per-subject state
//! machine, the cache error taxonomy, and the collaborator traits
//! ([`chunk::Chunker`], [`embedding::Embedder`]).
//!
//! This crate contains no tokio, filesystem I/O, or network code. The
//! `lesson-harness` app crate wires these pieces to the disk, the
//! embedding backends, the CLI, and the HTTP server.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod models;
pub mod state;

pub use error::{CacheError, IngestFailure};
pub use fingerprint::ContentFingerprint;
pub use index::{FlatIndex, SearchHit, VectorIndex};
pub use state::SubjectState;
