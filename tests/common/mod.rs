//! Fixtures shared by the integration tests: a curriculum tree in a temp
//! dir, a text-only chunker, and a deterministic embedder with knobs for
//! slowness and failure.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use lesson_harness::cache::CacheManager;
use lesson_harness::config::{parse_config, Config};
use lesson_harness_core::chunk::{chunk_unit, ChunkSpec, Chunker};
use lesson_harness_core::embedding::Embedder;
use lesson_harness_core::models::{Chunk, SourceFile};

pub const DIMS: usize = 16;

/// Curriculum and cache roots under one temp dir.
pub struct Fixture {
    pub tmp: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("curriculum")).unwrap();
        let config = parse_config(&format!(
            r#"[curriculum]
root = '{root}/curriculum'
include_globs = ["**/*.pdf", "**/*.md", "**/*.txt", "**/*.docx"]

[cache]
root = '{root}/cache'

[retrieval]
top_k = 3
"#,
            root = tmp.path().display()
        ))
        .unwrap();
        Self { tmp, config }
    }

    pub fn curriculum(&self) -> PathBuf {
        self.config.curriculum.root.clone()
    }

    pub fn cache(&self) -> PathBuf {
        self.config.cache.root.clone()
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        let dir = self.curriculum().join(subject);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write(&self, subject: &str, file: &str, text: &str) {
        let path = self.subject_dir(subject).join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    pub fn remove(&self, subject: &str, file: &str) {
        fs::remove_file(self.curriculum().join(subject).join(file)).unwrap();
    }

    pub fn manifest(&self, subject: &str) -> PathBuf {
        self.cache().join(subject).join("manifest.json")
    }

    /// The single vectors file currently in the subject's cache dir.
    pub fn vectors_file(&self, subject: &str) -> PathBuf {
        vectors_files(&self.cache().join(subject))
            .into_iter()
            .next()
            .expect("no vectors file")
    }

    pub fn manager(&self, embedder: Arc<dyn Embedder>) -> CacheManager {
        CacheManager::with_collaborators(&self.config, Arc::new(TextChunker), embedder).unwrap()
    }
}

pub fn vectors_files(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("vectors-") && n.ends_with(".bin"))
                })
                .collect()
        })
        .unwrap_or_default();
    found.sort();
    found
}

/// Treats every file as UTF-8 text, whatever its extension, so tests can
/// name a fixture `syllabus.pdf`. A file containing `BROKEN` fails.
pub struct TextChunker;

impl Chunker for TextChunker {
    fn chunk(&self, file: &SourceFile) -> anyhow::Result<Vec<Chunk>> {
        let text = std::str::from_utf8(&file.bytes)?;
        if text.contains("BROKEN") {
            anyhow::bail!("unsupported document structure");
        }
        let spec = ChunkSpec::default();
        let mut chunks = Vec::new();
        for (i, section) in text.split("\n\n").enumerate() {
            let next = chunks.len();
            chunks.extend(chunk_unit(
                &file.path,
                &format!("section {}", i + 1),
                section,
                &spec,
                next,
            ));
        }
        Ok(chunks)
    }
}

/// Bag-of-words hashing embedder: texts sharing words point the same way.
#[derive(Default)]
pub struct HashEmbedder {
    /// Number of `embed` calls.
    pub calls: AtomicUsize,
    /// Sleep before answering when a text contains `SLOW`, or always when
    /// `always_slow` is set.
    pub delay: Duration,
    pub always_slow: AtomicBool,
    /// Fail every call while set.
    pub failing: AtomicBool,
    /// Answer texts containing `NAN` with a NaN vector.
    pub nan_on_marker: AtomicBool,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            always_slow: AtomicBool::new(true),
            ..Self::default()
        })
    }

    /// Slow only for texts containing `SLOW`.
    pub fn slow_on_marker(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_nan_on_marker(&self, on: bool) {
        self.nan_on_marker.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slow = self.always_slow.load(Ordering::SeqCst)
            || texts.iter().any(|t| t.contains("SLOW"));
        if slow && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unavailable");
        }
        let nan = self.nan_on_marker.load(Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = bag_of_words(t);
                if nan && t.contains("NAN") {
                    v[0] = f32::NAN;
                }
                v
            })
            .collect())
    }
}

/// Panics inside `embed`, as a buggy backend would.
pub struct PanicEmbedder;

#[async_trait]
impl Embedder for PanicEmbedder {
    fn model_name(&self) -> &str {
        "panic"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        panic!("embedder bug");
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}
