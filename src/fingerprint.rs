//! Source scanning and content fingerprints.
//!
//! [`FingerprintStore`] walks one subject's curriculum folder, reads every
//! tracked file fresh from disk, and derives the subject's
//! [`ContentFingerprint`]. It also reads the fingerprint recorded in the
//! subject's persisted manifest, without touching the vectors payload.
//!
//! A file is tracked when its path relative to the subject folder matches
//! one of `curriculum.include_globs` and none of the exclude globs. Hidden
//! files and directories and Office lock files (`~$*`) are never tracked.
//!
//! All methods here do blocking I/O; async callers run them on the
//! blocking pool.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use lesson_harness_core::models::{SourceDocumentSet, SourceFile};
use lesson_harness_core::{CacheError, ContentFingerprint};

use crate::config::CurriculumConfig;
use crate::persistence::IndexPersistence;

const DEFAULT_EXCLUDES: &[&str] = &["**/~$*", "**/*.tmp"];

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    persistence: IndexPersistence,
}

impl FingerprintStore {
    pub fn new(config: &CurriculumConfig, persistence: IndexPersistence) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            root: config.root.clone(),
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
            persistence,
        })
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(subject)
    }

    /// Relative paths of the subject's tracked files, sorted.
    pub fn list_files(&self, subject: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .tracked_paths(subject)?
            .into_iter()
            .map(|(_, rel)| rel)
            .collect())
    }

    /// Read every tracked file of a subject.
    pub fn read_sources(&self, subject: &str) -> Result<SourceDocumentSet, CacheError> {
        let mut files = Vec::new();
        for (path, rel) in self.tracked_paths(subject)? {
            let bytes = std::fs::read(&path)
                .map_err(|e| CacheError::source_unreadable(subject, &path, e))?;
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            files.push(SourceFile::new(rel, bytes, modified));
        }
        Ok(SourceDocumentSet::new(subject, files))
    }

    /// Fingerprint of the subject's current sources.
    pub fn compute_fingerprint(&self, subject: &str) -> Result<ContentFingerprint, CacheError> {
        let set = self.read_sources(subject)?;
        Ok(ContentFingerprint::compute(&set))
    }

    /// Fingerprint recorded in the subject's manifest, if one exists.
    ///
    /// An unreadable or malformed manifest is reported as `CorruptArtifact`.
    pub fn read_persisted_fingerprint(
        &self,
        subject: &str,
    ) -> Result<Option<ContentFingerprint>, CacheError> {
        match self.persistence.read_manifest_header(subject) {
            Ok(header) => Ok(Some(header.fingerprint)),
            Err(CacheError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn tracked_paths(&self, subject: &str) -> Result<Vec<(PathBuf, String)>, CacheError> {
        let dir = self.subject_dir(subject);
        let mut out = Vec::new();

        let walker = WalkDir::new(&dir)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                CacheError::source_unreadable(subject, path, std::io::Error::from(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
            let rel = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            out.push((entry.path().to_path_buf(), rel));
        }

        out.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(out)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
