//! # Lesson Harness
//!
//! A per-subject curriculum index cache for retrieval-augmented lesson
//! generation.
//!
//! Each subject is a folder of source documents (PDF, DOCX, Markdown, plain
//! text) under the curriculum root. Lesson Harness chunks and embeds a
//! subject once, persists the resulting vector index together with a
//! content fingerprint of its sources, and on later runs reuses the
//! persisted index as long as the fingerprint still matches. Changed,
//! missing, or corrupt artifacts are rebuilt transparently; at most one
//! rebuild per subject runs at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Curriculum  │──▶│ Fingerprint  │──▶│ CacheManager  │◀── CLI (lesson)
//! │ <subject>/*  │   │    Store     │   │  per-subject  │◀── HTTP (axum)
//! └──────────────┘   └──────────────┘   │     gates     │
//!                                       └──┬─────────┬──┘
//!                                          ▼         ▼
//!                                 ┌────────────┐ ┌─────────────┐
//!                                 │   Index    │◀│   Rebuild   │
//!                                 │ Persistence│ │ Coordinator │
//!                                 └────────────┘ └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lesson subjects               # what the curriculum root contains
//! lesson build                  # load or rebuild every subject
//! lesson status                 # which artifacts are fresh
//! lesson search Mathematics "completing the square"
//! lesson serve                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cache`] | `CacheManager`: resolve, force rebuild, invalidate |
//! | [`registry`] | Subject discovery and lifecycle state |
//! | [`fingerprint`] | Source scanning and content fingerprints |
//! | [`persistence`] | Atomic on-disk artifacts and validation |
//! | [`rebuild`] | Chunk, embed, index, persist |
//! | [`chunk`] | Document chunker over extracted text |
//! | [`extract`] | PDF, DOCX, and text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`search`] | Retrieval over a resident index |
//! | [`status`] | Live and on-disk status reports |
//! | [`config`] | TOML configuration parsing |
//! | [`server`] | HTTP retrieval server |
//! | [`build_cmd`] | `lesson build` and `lesson purge` |

pub mod build_cmd;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod fingerprint;
pub mod persistence;
pub mod rebuild;
pub mod registry;
pub mod search;
pub mod server;
pub mod status;
