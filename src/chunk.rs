//! Document chunker: extraction plus paragraph chunking.
//!
//! [`DocumentChunker`] is the production [`Chunker`]. It extracts text units
//! from a source file (see [`crate::extract`]) and splits each unit with the
//! core paragraph chunker. Chunk indices run contiguously across all units
//! of a file, so `(source, chunk_index)` identifies a chunk within a build.

use anyhow::Result;

use lesson_harness_core::chunk::{chunk_unit, ChunkSpec, Chunker};
use lesson_harness_core::models::{Chunk, SourceFile};

use crate::extract::extract_units;

#[derive(Debug, Clone, Default)]
pub struct DocumentChunker {
    spec: ChunkSpec,
}

impl DocumentChunker {
    pub fn new(spec: ChunkSpec) -> Self {
        Self { spec }
    }
}

impl Chunker for DocumentChunker {
    fn chunk(&self, file: &SourceFile) -> Result<Vec<Chunk>> {
        let extension = file.extension();
        let units = extract_units(extension.as_deref(), &file.bytes)?;

        let mut chunks = Vec::new();
        for unit in &units {
            let next = chunks.len();
            chunks.extend(chunk_unit(
                &file.path,
                &unit.locator,
                &unit.text,
                &self.spec,
                next,
            ));
        }
        Ok(chunks)
    }
}
