//! Rebuild pipeline: sources → chunks → vectors → persisted artifact.
//!
//! [`RebuildCoordinator::rebuild`] runs the whole pipeline for one subject
//! and either returns a complete, saved [`CachedIndex`] or fails without
//! touching the previous artifact. A single file that cannot be chunked or
//! embedded aborts the rebuild with `PartialIngestFailure`; the subject is
//! never indexed with a file silently missing.
//!
//! The coordinator itself does no locking. Callers (the cache manager)
//! guarantee at most one rebuild per subject at a time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use lesson_harness_core::chunk::Chunker;
use lesson_harness_core::embedding::Embedder;
use lesson_harness_core::index::FlatIndex;
use lesson_harness_core::models::{Chunk, ChunkRecord, SourceDocumentSet};
use lesson_harness_core::{CacheError, ContentFingerprint, IngestFailure};

use crate::persistence::{CachedIndex, EmbeddingInfo, IndexPersistence};

pub struct RebuildCoordinator {
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    persistence: IndexPersistence,
    batch_size: usize,
}

impl RebuildCoordinator {
    pub fn new(
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        persistence: IndexPersistence,
        batch_size: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            persistence,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn persistence(&self) -> &IndexPersistence {
        &self.persistence
    }

    /// Build, save and return a new index for `set`.
    pub async fn rebuild(&self, set: SourceDocumentSet) -> Result<CachedIndex, CacheError> {
        let subject = set.subject.clone();
        if set.is_empty() {
            return Err(CacheError::EmptySubject { subject });
        }

        let started = Instant::now();
        let fingerprint = ContentFingerprint::compute(&set);
        let files = set.digests();
        tracing::info!(
            subject = %subject,
            fingerprint = %fingerprint.short(),
            files = files.len(),
            "rebuild started"
        );

        let chunker = Arc::clone(&self.chunker);
        let (chunks, failures) = tokio::task::spawn_blocking(move || chunk_all(&*chunker, &set))
            .await
            .map_err(|e| interrupted(&subject, e))?;

        if !failures.is_empty() {
            return Err(CacheError::PartialIngestFailure { subject, failures });
        }
        if chunks.is_empty() {
            let failures = files
                .iter()
                .map(|f| IngestFailure {
                    path: f.path.clone(),
                    reason: "no extractable text".to_string(),
                })
                .collect();
            return Err(CacheError::PartialIngestFailure { subject, failures });
        }

        let dims = self.embedder.dims();
        let vectors = self.embed_all(&subject, &chunks, dims).await?;
        let index = FlatIndex::build(dims, &vectors)
            .map_err(|e| batch_failure(&subject, &chunks, format!("{:#}", e)))?;

        let cached = CachedIndex {
            subject: subject.clone(),
            fingerprint,
            built_at: Utc::now(),
            embedding: EmbeddingInfo {
                model: self.embedder.model_name().to_string(),
                dims,
            },
            files,
            index,
            chunks: chunks
                .into_iter()
                .enumerate()
                .map(|(row, chunk)| ChunkRecord::from_chunk(row, chunk))
                .collect(),
        };

        let persistence = self.persistence.clone();
        let cached = tokio::task::spawn_blocking(move || persistence.save(&cached).map(|()| cached))
            .await
            .map_err(|e| interrupted(&subject, e))??;

        tracing::info!(
            subject = %subject,
            fingerprint = %cached.fingerprint.short(),
            chunks = cached.chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuild finished"
        );
        Ok(cached)
    }

    async fn embed_all(
        &self,
        subject: &str,
        chunks: &[Chunk],
        dims: usize,
    ) -> Result<Vec<Vec<f32>>, CacheError> {
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| batch_failure(subject, batch, format!("embedding failed: {:#}", e)))?;

            if embedded.len() != batch.len() {
                return Err(batch_failure(
                    subject,
                    batch,
                    format!(
                        "embedder returned {} vectors for {} chunks",
                        embedded.len(),
                        batch.len()
                    ),
                ));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dims) {
                return Err(batch_failure(
                    subject,
                    batch,
                    format!("embedder returned a {}-dim vector, expected {}", bad.len(), dims),
                ));
            }
            if embedded.iter().flatten().any(|x| !x.is_finite()) {
                return Err(batch_failure(
                    subject,
                    batch,
                    "embedder returned non-finite values".to_string(),
                ));
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}

fn chunk_all(chunker: &dyn Chunker, set: &SourceDocumentSet) -> (Vec<Chunk>, Vec<IngestFailure>) {
    let mut chunks = Vec::new();
    let mut failures = Vec::new();
    for file in &set.files {
        match chunker.chunk(file) {
            Ok(file_chunks) => chunks.extend(file_chunks),
            Err(e) => failures.push(IngestFailure {
                path: file.path.clone(),
                reason: format!("{:#}", e),
            }),
        }
    }
    (chunks, failures)
}

/// One failure per distinct source file in `chunks`, all with `reason`.
fn batch_failure(subject: &str, chunks: &[Chunk], reason: String) -> CacheError {
    let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
    CacheError::PartialIngestFailure {
        subject: subject.to_string(),
        failures: sources
            .into_iter()
            .map(|path| IngestFailure {
                path: path.to_string(),
                reason: reason.clone(),
            })
            .collect(),
    }
}

fn interrupted(subject: &str, err: tokio::task::JoinError) -> CacheError {
    CacheError::Interrupted {
        subject: subject.to_string(),
        reason: err.to_string(),
    }
}
