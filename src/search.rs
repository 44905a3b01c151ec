//! Retrieval over a subject's resident index.
//!
//! [`SubjectIndex`] is what the cache hands out: a loaded [`CachedIndex`]
//! that answers k-nearest-neighbour queries with ranked chunk payloads.
//! [`retrieve`] embeds a free-text query and searches one subject;
//! [`lesson_query`] builds the query used to gather lesson context.

use serde::Serialize;
use thiserror::Error;

use lesson_harness_core::embedding::embed_query;
use lesson_harness_core::index::{SearchHit, VectorIndex};
use lesson_harness_core::{CacheError, ContentFingerprint};

use crate::cache::CacheManager;
use crate::persistence::{CachedIndex, EmbeddingInfo};

/// A loaded, query-ready index for one subject.
#[derive(Debug)]
pub struct SubjectIndex {
    cached: CachedIndex,
}

/// One ranked chunk returned by a query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievedChunk {
    /// 1-based rank.
    pub rank: usize,
    pub score: f32,
    pub source: String,
    pub locator: String,
    pub text: String,
}

impl SubjectIndex {
    pub fn new(cached: CachedIndex) -> Self {
        Self { cached }
    }

    pub fn subject(&self) -> &str {
        &self.cached.subject
    }

    pub fn fingerprint(&self) -> &ContentFingerprint {
        &self.cached.fingerprint
    }

    pub fn built_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.cached.built_at
    }

    pub fn embedding(&self) -> &EmbeddingInfo {
        &self.cached.embedding
    }

    pub fn chunk_count(&self) -> usize {
        self.cached.chunks.len()
    }

    pub fn cached(&self) -> &CachedIndex {
        &self.cached
    }

    /// The `k` chunks closest to `vector`, best first.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<RetrievedChunk> {
        self.cached
            .index
            .search(vector, k)
            .into_iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                let record = self.cached.chunks.get(hit.row)?;
                Some(RetrievedChunk {
                    rank: i + 1,
                    score: hit.score,
                    source: record.source.clone(),
                    locator: record.locator.clone(),
                    text: record.text.clone(),
                })
            })
            .collect()
    }
}

impl VectorIndex for SubjectIndex {
    fn len(&self) -> usize {
        self.cached.index.len()
    }

    fn dims(&self) -> usize {
        self.cached.index.dims()
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.cached.index.search(query, k)
    }
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("embeddings are disabled; set [embedding] provider in the config")]
    EmbeddingsDisabled,
    #[error("query embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(
        "index for {subject} has {index_dims} dims but the embedder produces {query_dims}; \
         rebuild it with `lesson build {subject} --force`"
    )]
    DimsMismatch {
        subject: String,
        index_dims: usize,
        query_dims: usize,
    },
}

/// Embed `query` and return the `k` best chunks of `subject`.
pub async fn retrieve(
    manager: &CacheManager,
    subject: &str,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>, RetrieveError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(RetrieveError::EmptyQuery);
    }
    let embedder = manager.embedder();
    if embedder.dims() == 0 {
        return Err(RetrieveError::EmbeddingsDisabled);
    }

    let index = manager.get_index(subject).await?;
    let vector = embed_query(embedder.as_ref(), query)
        .await
        .map_err(RetrieveError::Embedding)?;
    if vector.len() != index.dims() {
        return Err(RetrieveError::DimsMismatch {
            subject: subject.to_string(),
            index_dims: index.dims(),
            query_dims: vector.len(),
        });
    }

    let hits = index.query(&vector, k);
    tracing::debug!(subject, k, hits = hits.len(), "retrieved");
    Ok(hits)
}

/// Retrieval query used to gather context for a lesson.
pub fn lesson_query(subject: &str, topic: &str, level: &str) -> String {
    format!(
        "{} {} syllabus content for the topic: {}",
        level.trim(),
        subject.trim(),
        topic.trim()
    )
}

/// `lesson search`: print the ranked chunks of one subject.
pub async fn run_search(
    manager: &CacheManager,
    subject: &str,
    query: &str,
    k: usize,
) -> anyhow::Result<()> {
    let hits = retrieve(manager, subject, query, k).await?;
    print_hits(&hits);
    Ok(())
}

/// `lesson context`: print the passages gathered for a lesson.
pub async fn run_context(
    manager: &CacheManager,
    subject: &str,
    topic: &str,
    level: &str,
    k: usize,
) -> anyhow::Result<()> {
    let query = lesson_query(subject, topic, level);
    let passages = retrieve(manager, subject, &query, k).await?;
    println!("query: {}", query);
    println!();
    print_hits(&passages);
    Ok(())
}

fn print_hits(hits: &[RetrievedChunk]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for hit in hits {
        println!("{}. [{:.2}] {} / {}", hit.rank, hit.score, hit.source, hit.locator);
        println!("    excerpt: \"{}\"", hit.text.replace('\n', " ").trim());
        println!();
    }
}
