//! Durable per-subject index artifacts.
//!
//! Layout under the cache root:
//!
//! ```text
//! <cache.root>/<subject>/
//!     manifest.json          fingerprint, file digests, chunk records
//!     vectors-<uuid>.bin     FlatIndex bytes ("LHVX" header + f32 rows)
//! ```
//!
//! Saving is two-phase. [`IndexPersistence::stage`] writes a fresh,
//! uniquely named vectors file (tmp, fsync, rename); it is invisible to
//! readers because no manifest references it yet. [`IndexPersistence::commit`]
//! then replaces `manifest.json` the same way. The manifest rename is the
//! commit point: a reader sees either the old manifest with its old vectors
//! file or the new manifest with its new one. Vectors files no manifest
//! references are removed after the commit.
//!
//! Writers in different processes (`lesson build` next to `lesson serve`)
//! serialize on an advisory lock, `<cache.root>/.locks/<subject>.lock`,
//! held from `stage` until `commit` returns, and by `delete`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use lesson_harness_core::index::{FlatIndex, VectorIndex};
use lesson_harness_core::models::{sha256_hex, ChunkRecord, SourceFileDigest};
use lesson_harness_core::{CacheError, ContentFingerprint};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;
const VECTORS_PREFIX: &str = "vectors-";
const VECTORS_SUFFIX: &str = ".bin";
const LOCK_DIR: &str = ".locks";

/// A complete index for one subject, as held in memory and on disk.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub subject: String,
    pub fingerprint: ContentFingerprint,
    pub built_at: DateTime<Utc>,
    pub embedding: EmbeddingInfo,
    pub files: Vec<SourceFileDigest>,
    pub index: FlatIndex,
    /// One record per index row, in row order.
    pub chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub model: String,
    pub dims: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorsInfo {
    file: String,
    sha256: String,
    bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    subject: String,
    fingerprint: ContentFingerprint,
    built_at: DateTime<Utc>,
    embedding: EmbeddingInfo,
    chunk_count: usize,
    files: Vec<SourceFileDigest>,
    vectors: VectorsInfo,
    chunks: Vec<ChunkRecord>,
}

/// The leading fields of a manifest, read without the chunk records or
/// the vectors file.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestHeader {
    pub version: u32,
    pub subject: String,
    pub fingerprint: ContentFingerprint,
    pub built_at: DateTime<Utc>,
    pub embedding: EmbeddingInfo,
    pub chunk_count: usize,
}

/// Exclusive hold on a subject's artifact directory, across processes.
/// Released on drop.
#[derive(Debug)]
pub struct SubjectLock {
    _file: File,
}

/// A vectors file written to disk but not yet referenced by a manifest.
///
/// Holds the subject's lock until committed or dropped.
#[derive(Debug)]
pub struct StagedArtifact {
    subject: String,
    manifest: Manifest,
    _lock: SubjectLock,
}

impl StagedArtifact {
    pub fn vectors_file(&self) -> &str {
        &self.manifest.vectors.file
    }
}

#[derive(Debug, Clone)]
pub struct IndexPersistence {
    root: PathBuf,
}

impl IndexPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(subject)
    }

    pub fn manifest_path(&self, subject: &str) -> PathBuf {
        self.subject_dir(subject).join(MANIFEST_FILE)
    }

    /// Load and fully validate a subject's artifact.
    ///
    /// Returns `NotFound` when there is no manifest and `CorruptArtifact`
    /// for anything inconsistent behind it.
    pub fn load(&self, subject: &str) -> Result<CachedIndex, CacheError> {
        let manifest: Manifest = self.read_manifest(subject)?;
        let corrupt = |reason: String| CacheError::corrupt(subject, reason);

        if manifest.version != MANIFEST_VERSION {
            return Err(corrupt(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }
        if manifest.subject != subject {
            return Err(corrupt(format!(
                "manifest belongs to subject {:?}",
                manifest.subject
            )));
        }
        if ContentFingerprint::from_digests(&manifest.files) != manifest.fingerprint {
            return Err(corrupt(
                "fingerprint does not match recorded file digests".to_string(),
            ));
        }
        if !is_vectors_file_name(&manifest.vectors.file) {
            return Err(corrupt(format!(
                "invalid vectors file name {:?}",
                manifest.vectors.file
            )));
        }

        let vectors_path = self.subject_dir(subject).join(&manifest.vectors.file);
        let bytes = fs::read(&vectors_path)
            .map_err(|e| corrupt(format!("cannot read {}: {}", manifest.vectors.file, e)))?;
        if bytes.len() as u64 != manifest.vectors.bytes {
            return Err(corrupt(format!(
                "vectors file is {} bytes, manifest records {}",
                bytes.len(),
                manifest.vectors.bytes
            )));
        }
        if sha256_hex(&bytes) != manifest.vectors.sha256 {
            return Err(corrupt("vectors checksum mismatch".to_string()));
        }

        let index = FlatIndex::from_bytes(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if index.dims() != manifest.embedding.dims {
            return Err(corrupt(format!(
                "index has {} dims, manifest records {}",
                index.dims(),
                manifest.embedding.dims
            )));
        }
        if index.len() != manifest.chunks.len() || manifest.chunk_count != manifest.chunks.len() {
            return Err(corrupt(format!(
                "index has {} rows but manifest lists {} chunks",
                index.len(),
                manifest.chunks.len()
            )));
        }
        if let Some((pos, _)) = manifest
            .chunks
            .iter()
            .enumerate()
            .find(|(pos, c)| c.row != *pos)
        {
            return Err(corrupt(format!("chunk record {} is out of order", pos)));
        }

        Ok(CachedIndex {
            subject: manifest.subject,
            fingerprint: manifest.fingerprint,
            built_at: manifest.built_at,
            embedding: manifest.embedding,
            files: manifest.files,
            index,
            chunks: manifest.chunks,
        })
    }

    /// Read only the manifest header (fingerprint, build time, model).
    pub fn read_manifest_header(&self, subject: &str) -> Result<ManifestHeader, CacheError> {
        let header: ManifestHeader = self.read_manifest(subject)?;
        if header.version != MANIFEST_VERSION {
            return Err(CacheError::corrupt(
                subject,
                format!("unsupported manifest version {}", header.version),
            ));
        }
        Ok(header)
    }

    /// Atomically replace the subject's artifact with `cached`.
    pub fn save(&self, cached: &CachedIndex) -> Result<(), CacheError> {
        let staged = self.stage(cached)?;
        self.commit(staged)
    }

    /// Block until this process holds the subject's writer lock.
    pub fn lock(&self, subject: &str) -> Result<SubjectLock, CacheError> {
        let dir = self.root.join(LOCK_DIR);
        fs::create_dir_all(&dir).map_err(|e| CacheError::artifact_write(subject, &dir, e))?;
        let path = dir.join(format!("{}.lock", subject));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CacheError::artifact_write(subject, &path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| CacheError::artifact_write(subject, &path, e))?;
        Ok(SubjectLock { _file: file })
    }

    /// Write the vectors file for `cached` without publishing it.
    pub fn stage(&self, cached: &CachedIndex) -> Result<StagedArtifact, CacheError> {
        let subject = cached.subject.as_str();
        let lock = self.lock(subject)?;
        let dir = self.subject_dir(subject);
        fs::create_dir_all(&dir).map_err(|e| CacheError::artifact_write(subject, &dir, e))?;

        let bytes = cached.index.to_bytes();
        let file = format!(
            "{}{}{}",
            VECTORS_PREFIX,
            uuid::Uuid::new_v4().simple(),
            VECTORS_SUFFIX
        );
        let path = dir.join(&file);
        write_atomic(&path, &bytes).map_err(|e| CacheError::artifact_write(subject, &path, e))?;

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            subject: subject.to_string(),
            fingerprint: cached.fingerprint.clone(),
            built_at: cached.built_at,
            embedding: cached.embedding.clone(),
            chunk_count: cached.chunks.len(),
            files: cached.files.clone(),
            vectors: VectorsInfo {
                file,
                sha256: sha256_hex(&bytes),
                bytes: bytes.len() as u64,
            },
            chunks: cached.chunks.clone(),
        };

        Ok(StagedArtifact {
            subject: subject.to_string(),
            manifest,
            _lock: lock,
        })
    }

    /// Publish a staged artifact by replacing the manifest.
    pub fn commit(&self, staged: StagedArtifact) -> Result<(), CacheError> {
        let subject = staged.subject.as_str();
        let dir = self.subject_dir(subject);
        let path = dir.join(MANIFEST_FILE);

        let json = serde_json::to_vec_pretty(&staged.manifest)
            .map_err(|e| CacheError::artifact_write(subject, &path, io::Error::other(e)))?;
        write_atomic(&path, &json).map_err(|e| CacheError::artifact_write(subject, &path, e))?;
        sync_dir(&dir).map_err(|e| CacheError::artifact_write(subject, &dir, e))?;

        self.remove_unreferenced(subject, &staged.manifest.vectors.file);
        Ok(())
    }

    /// Remove a subject's artifact. A missing artifact is not an error.
    pub fn delete(&self, subject: &str) -> Result<(), CacheError> {
        let _lock = self.lock(subject)?;
        let dir = self.subject_dir(subject);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::artifact_write(subject, &dir, e)),
        }
    }

    fn read_manifest<T: serde::de::DeserializeOwned>(&self, subject: &str) -> Result<T, CacheError> {
        let path = self.manifest_path(subject);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound {
                    subject: subject.to_string(),
                })
            }
            Err(e) => {
                return Err(CacheError::corrupt(
                    subject,
                    format!("cannot read manifest: {}", e),
                ))
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::corrupt(subject, format!("invalid manifest: {}", e)))
    }

    fn remove_unreferenced(&self, subject: &str, keep: &str) {
        let dir = self.subject_dir(subject);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(subject, error = %e, "cannot list artifact directory for cleanup");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let stale_vectors = is_vectors_file_name(&name) && name != keep;
            let leftover_tmp = name.ends_with(".tmp");
            if stale_vectors || leftover_tmp {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!(subject, file = %name, error = %e, "cannot remove stale artifact file");
                }
            }
        }
    }
}

fn is_vectors_file_name(name: &str) -> bool {
    name.starts_with(VECTORS_PREFIX)
        && name.ends_with(VECTORS_SUFFIX)
        && !name.contains(['/', '\\'])
        && name.len() > VECTORS_PREFIX.len() + VECTORS_SUFFIX.len()
}

/// Write `bytes` to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
