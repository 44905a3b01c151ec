//! The vectorstore cache manager.
//!
//! [`CacheManager::get_index`] is the entry point every consumer uses: it
//! returns a query-ready [`SubjectIndex`] for a subject, deciding between
//! the resident copy, the persisted artifact, and a rebuild.
//!
//! # Resolution
//!
//! 1. Read the subject's sources and compute their fingerprint.
//! 2. If the resident index carries that fingerprint, return it.
//! 3. Otherwise (`loading`) read the persisted manifest header; if its
//!    fingerprint matches, load and validate the full artifact.
//! 4. On a miss, mismatch, or corrupt artifact (`building`), rebuild,
//!    persist atomically, and make the result resident.
//!
//! # Concurrency
//!
//! Each subject has its own async gate. A caller takes the gate and hands
//! it to a spawned task that performs the resolution, so dropping the
//! caller's future never cancels a load or rebuild in flight. Callers that
//! queued on the gate while another resolution ran reuse its outcome: they
//! get the fresh resident index, or the same error if that resolution
//! failed. Gates of different subjects are independent; blocking I/O and
//! chunking run on the blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Result;
use tokio::sync::OwnedMutexGuard;

use lesson_harness_core::chunk::Chunker;
use lesson_harness_core::embedding::Embedder;
use lesson_harness_core::{CacheError, ContentFingerprint, SubjectState};

use crate::chunk::DocumentChunker;
use crate::config::Config;
use crate::fingerprint::FingerprintStore;
use crate::persistence::IndexPersistence;
use crate::rebuild::RebuildCoordinator;
use crate::registry::SubjectRegistry;
use crate::search::SubjectIndex;
use crate::status::SubjectStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Reuse the resident or persisted index when its fingerprint matches.
    Cached,
    /// Always rebuild.
    Force,
}

/// Resident state guarded by a subject's gate.
#[derive(Default)]
struct Slot {
    resident: Option<Arc<SubjectIndex>>,
    last_failure: Option<CacheError>,
}

#[derive(Default)]
struct Gate {
    slot: Arc<tokio::sync::Mutex<Slot>>,
    /// Completed resolutions, bumped while the slot is held.
    completed: AtomicU64,
}

struct Inner {
    registry: SubjectRegistry,
    fingerprints: FingerprintStore,
    persistence: IndexPersistence,
    rebuilder: RebuildCoordinator,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    rebuilds: AtomicU64,
}

/// Per-subject index cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(
        registry: SubjectRegistry,
        fingerprints: FingerprintStore,
        rebuilder: RebuildCoordinator,
    ) -> Self {
        let persistence = rebuilder.persistence().clone();
        Self {
            inner: Arc::new(Inner {
                registry,
                fingerprints,
                persistence,
                rebuilder,
                gates: Mutex::new(HashMap::new()),
                rebuilds: AtomicU64::new(0),
            }),
        }
    }

    /// Wire a manager from configuration with the production chunker.
    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let chunker: Arc<dyn Chunker> = Arc::new(DocumentChunker::new(config.chunking.spec()));
        Self::with_collaborators(config, chunker, embedder)
    }

    /// Wire a manager from configuration with explicit collaborators.
    pub fn with_collaborators(
        config: &Config,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let persistence = IndexPersistence::new(&config.cache.root);
        let fingerprints = FingerprintStore::new(&config.curriculum, persistence.clone())?;
        let registry = SubjectRegistry::new(&config.curriculum.root);
        registry.discover_subjects()?;
        let rebuilder =
            RebuildCoordinator::new(chunker, embedder, persistence, config.embedding.batch_size);
        Ok(Self::new(registry, fingerprints, rebuilder))
    }

    pub fn registry(&self) -> &SubjectRegistry {
        &self.inner.registry
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.inner.fingerprints
    }

    pub fn persistence(&self) -> &IndexPersistence {
        &self.inner.persistence
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        self.inner.rebuilder.embedder()
    }

    /// Total rebuilds started by this manager.
    pub fn rebuild_count(&self) -> u64 {
        self.inner.rebuilds.load(Ordering::SeqCst)
    }

    /// A query-ready index for `subject`, rebuilding only when needed.
    pub async fn get_index(&self, subject: &str) -> Result<Arc<SubjectIndex>, CacheError> {
        self.resolve(subject, Mode::Cached).await
    }

    /// Rebuild `subject` regardless of any cached artifact.
    ///
    /// The previous artifact stays active until the new one is committed.
    pub async fn force_rebuild(&self, subject: &str) -> Result<Arc<SubjectIndex>, CacheError> {
        self.resolve(subject, Mode::Force).await
    }

    /// Delete the subject's artifact and drop its resident index.
    ///
    /// Runs to completion even if the caller is dropped.
    pub async fn invalidate(&self, subject: &str) -> Result<(), CacheError> {
        self.ensure_known(subject).await?;
        let gate = self.inner.gate(subject);
        let slot = Arc::clone(&gate.slot).lock_owned().await;

        let inner = Arc::clone(&self.inner);
        let name = subject.to_string();
        let task = tokio::spawn(async move { inner.invalidate_locked(&name, slot).await });
        task.await.map_err(|e| interrupted(subject, e))?
    }

    /// Re-list the curriculum root off the async runtime.
    pub async fn discover_subjects(&self) -> Result<Vec<String>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.registry.discover_subjects()).await?
    }

    /// Status of every registered subject.
    pub fn statuses(&self) -> Vec<SubjectStatus> {
        self.inner
            .registry
            .snapshot()
            .into_iter()
            .map(|(subject, state)| {
                let resident = self.inner.peek_resident(&subject);
                SubjectStatus::new(subject, state, resident.as_deref())
            })
            .collect()
    }

    async fn resolve(&self, subject: &str, mode: Mode) -> Result<Arc<SubjectIndex>, CacheError> {
        self.ensure_known(subject).await?;
        let gate = self.inner.gate(subject);
        let seen = gate.completed.load(Ordering::SeqCst);
        let slot = Arc::clone(&gate.slot).lock_owned().await;

        let inner = Arc::clone(&self.inner);
        let name = subject.to_string();
        let task = tokio::spawn(async move { inner.resolve_locked(&name, &gate, slot, mode, seen).await });
        match task.await {
            Ok(result) => result,
            // A panicking collaborator unwinds past every state update.
            Err(e) => Err(self.inner.fail(subject, interrupted(subject, e))),
        }
    }

    /// `UnknownSubject` unless registered; re-discovery runs on the blocking pool.
    async fn ensure_known(&self, subject: &str) -> Result<(), CacheError> {
        if self.inner.registry.contains(subject) {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let name = subject.to_string();
        tokio::task::spawn_blocking(move || inner.registry.ensure_known(&name))
            .await
            .map_err(|e| interrupted(subject, e))?
    }
}

impl Inner {
    fn gate(&self, subject: &str) -> Arc<Gate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(subject.to_string()).or_default())
    }

    /// The resident index, unless a resolution currently holds the gate.
    fn peek_resident(&self, subject: &str) -> Option<Arc<SubjectIndex>> {
        let gate = {
            let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            gates.get(subject).cloned()?
        };
        let slot = gate.slot.try_lock().ok()?;
        slot.resident.clone()
    }

    async fn invalidate_locked(
        &self,
        subject: &str,
        mut slot: OwnedMutexGuard<Slot>,
    ) -> Result<(), CacheError> {
        let persistence = self.persistence.clone();
        let name = subject.to_string();
        tokio::task::spawn_blocking(move || persistence.delete(&name))
            .await
            .map_err(|e| interrupted(subject, e))??;

        slot.resident = None;
        slot.last_failure = None;
        if self.registry.get_state(subject)? != SubjectState::Unknown {
            self.registry.set_state(subject, SubjectState::Unknown);
        }
        tracing::info!(subject, "cached index invalidated");
        Ok(())
    }

    async fn resolve_locked(
        &self,
        subject: &str,
        gate: &Gate,
        mut slot: OwnedMutexGuard<Slot>,
        mode: Mode,
        seen: u64,
    ) -> Result<Arc<SubjectIndex>, CacheError> {
        if mode == Mode::Cached && gate.completed.load(Ordering::SeqCst) != seen {
            if let Some(err) = &slot.last_failure {
                tracing::debug!(subject, "reusing outcome of the resolution just finished");
                return Err(err.clone());
            }
        }

        let result = self.resolve_slot(subject, &mut slot, mode).await;
        slot.last_failure = result.as_ref().err().cloned();
        gate.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn resolve_slot(
        &self,
        subject: &str,
        slot: &mut Slot,
        mode: Mode,
    ) -> Result<Arc<SubjectIndex>, CacheError> {
        let started = Instant::now();

        let fingerprints = self.fingerprints.clone();
        let name = subject.to_string();
        let read = tokio::task::spawn_blocking(move || fingerprints.read_sources(&name))
            .await
            .map_err(|e| interrupted(subject, e))
            .and_then(|r| r);
        let set = match read {
            Ok(set) if set.is_empty() => {
                return Err(self.fail(
                    subject,
                    CacheError::EmptySubject {
                        subject: subject.to_string(),
                    },
                ))
            }
            Ok(set) => set,
            Err(e) => return Err(self.fail(subject, e)),
        };
        let fingerprint = ContentFingerprint::compute(&set);

        if mode == Mode::Cached {
            if let Some(resident) = &slot.resident {
                if resident.fingerprint() == &fingerprint {
                    tracing::debug!(
                        subject,
                        fingerprint = %fingerprint.short(),
                        "cache hit (resident)"
                    );
                    if !self.registry.get_state(subject)?.is_ready() {
                        self.registry.set_state(subject, SubjectState::Ready);
                    }
                    return Ok(Arc::clone(resident));
                }
            }

            self.registry.set_state(subject, SubjectState::Loading);
            if let Some(index) = self.load_matching(subject, &fingerprint).await {
                let index = Arc::new(index);
                slot.resident = Some(Arc::clone(&index));
                self.registry.set_state(subject, SubjectState::Ready);
                tracing::info!(
                    subject,
                    fingerprint = %fingerprint.short(),
                    chunks = index.chunk_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "loaded cached index"
                );
                return Ok(index);
            }
        } else {
            tracing::info!(subject, "forced rebuild requested");
        }

        self.registry.set_state(subject, SubjectState::Building);
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        match self.rebuilder.rebuild(set).await {
            Ok(cached) => {
                let index = Arc::new(SubjectIndex::new(cached));
                slot.resident = Some(Arc::clone(&index));
                self.registry.set_state(subject, SubjectState::Ready);
                Ok(index)
            }
            Err(e) => Err(self.fail(subject, e)),
        }
    }

    /// Load the persisted artifact if it was built from `fingerprint`.
    ///
    /// Misses, mismatches and corruption are logged and yield `None`.
    async fn load_matching(
        &self,
        subject: &str,
        fingerprint: &ContentFingerprint,
    ) -> Option<SubjectIndex> {
        let fingerprints = self.fingerprints.clone();
        let persistence = self.persistence.clone();
        let name = subject.to_string();
        let expected = fingerprint.clone();

        let loaded = tokio::task::spawn_blocking(move || {
            match fingerprints.read_persisted_fingerprint(&name) {
                Ok(None) => {
                    tracing::info!(subject = %name, "no cached index");
                    return None;
                }
                Ok(Some(persisted)) if persisted != expected => {
                    tracing::info!(
                        subject = %name,
                        cached = %persisted.short(),
                        current = %expected.short(),
                        "sources changed since last build"
                    );
                    return None;
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::warn!(subject = %name, error = %e, "unreadable manifest, rebuilding");
                    return None;
                }
            }

            match persistence.load(&name) {
                Ok(cached) if cached.fingerprint == expected => Some(cached),
                Ok(_) => {
                    tracing::info!(subject = %name, "artifact replaced during load");
                    None
                }
                Err(CacheError::NotFound { .. }) => None,
                Err(e) => {
                    tracing::warn!(subject = %name, error = %e, "corrupt cached index, rebuilding");
                    None
                }
            }
        })
        .await;

        let cached = match loaded {
            Ok(cached) => cached?,
            Err(e) => {
                tracing::warn!(subject, error = %e, "artifact load task failed");
                return None;
            }
        };

        let embedder = self.rebuilder.embedder();
        if cached.embedding.model != embedder.model_name() || cached.embedding.dims != embedder.dims()
        {
            tracing::warn!(
                subject,
                cached_model = %cached.embedding.model,
                cached_dims = cached.embedding.dims,
                model = embedder.model_name(),
                dims = embedder.dims(),
                "cached index was built with a different embedding model; \
                 run `lesson build --force` to re-embed"
            );
        }
        Some(SubjectIndex::new(cached))
    }

    fn fail(&self, subject: &str, err: CacheError) -> CacheError {
        tracing::error!(subject, kind = err.kind(), error = %err, "cannot produce index");
        self.registry
            .set_state(subject, SubjectState::Failed(err.to_string()));
        err
    }
}

fn interrupted(subject: &str, err: tokio::task::JoinError) -> CacheError {
    CacheError::Interrupted {
        subject: subject.to_string(),
        reason: err.to_string(),
    }
}
