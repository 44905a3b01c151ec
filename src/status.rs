//! Subject status reporting.
//!
//! Two views are offered. [`SubjectStatus`] is the live, in-process view
//! (state machine plus resident index) used by the HTTP server.
//! [`ArtifactReport`] is the on-disk view used by `lesson status` and
//! `lesson subjects`: it compares each subject's current sources with its
//! persisted manifest without loading any vectors.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use lesson_harness_core::{CacheError, ContentFingerprint, SubjectState};

use crate::config::Config;
use crate::fingerprint::FingerprintStore;
use crate::persistence::IndexPersistence;
use crate::registry::SubjectRegistry;
use crate::search::SubjectIndex;

#[derive(Debug, Clone, Serialize)]
pub struct SubjectStatus {
    pub subject: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub chunks: Option<usize>,
    pub fingerprint: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    pub model: Option<String>,
}

impl SubjectStatus {
    pub fn new(subject: String, state: SubjectState, resident: Option<&SubjectIndex>) -> Self {
        Self {
            subject,
            state: state.as_str(),
            reason: state.failure_reason().map(str::to_string),
            chunks: resident.map(SubjectIndex::chunk_count),
            fingerprint: resident.map(|r| r.fingerprint().to_string()),
            built_at: resident.map(SubjectIndex::built_at),
            model: resident.map(|r| r.embedding().model.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SubjectState::Ready.as_str()
    }
}

/// How a subject's persisted artifact relates to its current sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Manifest fingerprint equals the current fingerprint.
    Fresh,
    /// Sources changed since the last build.
    Stale,
    /// No artifact on disk.
    Missing,
    /// Manifest unreadable or malformed.
    Corrupt,
    /// The subject has no tracked files.
    Empty,
    /// Sources could not be read.
    Unreadable(String),
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Missing => "missing",
            Self::Corrupt => "corrupt",
            Self::Empty => "empty",
            Self::Unreadable(_) => "unreadable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactReport {
    pub subject: String,
    pub files: usize,
    pub freshness: Freshness,
    pub chunks: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub model: Option<String>,
}

/// Compare one subject's sources with its persisted manifest header.
pub fn artifact_report(
    fingerprints: &FingerprintStore,
    persistence: &IndexPersistence,
    subject: &str,
) -> ArtifactReport {
    let mut report = ArtifactReport {
        subject: subject.to_string(),
        files: 0,
        freshness: Freshness::Missing,
        chunks: None,
        built_at: None,
        model: None,
    };

    let header = match persistence.read_manifest_header(subject) {
        Ok(header) => {
            report.chunks = Some(header.chunk_count);
            report.built_at = Some(header.built_at);
            report.model = Some(header.embedding.model.clone());
            Some(header)
        }
        Err(CacheError::NotFound { .. }) => None,
        Err(_) => {
            report.freshness = Freshness::Corrupt;
            None
        }
    };

    let set = match fingerprints.read_sources(subject) {
        Ok(set) => set,
        Err(e) => {
            report.freshness = Freshness::Unreadable(e.to_string());
            return report;
        }
    };
    report.files = set.len();
    if set.is_empty() {
        report.freshness = Freshness::Empty;
        return report;
    }

    if let Some(header) = header {
        report.freshness = if header.fingerprint == ContentFingerprint::compute(&set) {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
    }
    report
}

/// `lesson subjects`: discovered subjects with their tracked file counts.
pub fn print_subjects(config: &Config) -> Result<()> {
    let registry = SubjectRegistry::new(&config.curriculum.root);
    let fingerprints =
        FingerprintStore::new(&config.curriculum, IndexPersistence::new(&config.cache.root))?;
    let subjects = registry.discover_subjects()?;

    if subjects.is_empty() {
        println!(
            "No subjects found under {}",
            config.curriculum.root.display()
        );
        return Ok(());
    }

    println!("{:<24} FILES", "SUBJECT");
    for subject in subjects {
        match fingerprints.list_files(&subject) {
            Ok(files) => println!("{:<24} {}", subject, files.len()),
            Err(e) => println!("{:<24} ? ({})", subject, e),
        }
    }
    Ok(())
}

/// `lesson status`: per-subject artifact freshness, read from manifests.
pub fn print_status(config: &Config) -> Result<()> {
    let persistence = IndexPersistence::new(&config.cache.root);
    let fingerprints = FingerprintStore::new(&config.curriculum, persistence.clone())?;
    let registry = SubjectRegistry::new(&config.curriculum.root);
    let subjects = registry.discover_subjects()?;

    println!("Curriculum: {}", config.curriculum.root.display());
    println!("Cache:      {}", config.cache.root.display());
    println!();
    println!(
        "{:<24} {:<11} {:>6} {:>7}  {:<20} MODEL",
        "SUBJECT", "ARTIFACT", "FILES", "CHUNKS", "BUILT"
    );

    let mut fresh = 0usize;
    for subject in &subjects {
        let report = artifact_report(&fingerprints, &persistence, subject);
        if report.freshness == Freshness::Fresh {
            fresh += 1;
        }
        println!(
            "{:<24} {:<11} {:>6} {:>7}  {:<20} {}",
            report.subject,
            report.freshness.as_str(),
            report.files,
            report
                .chunks
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            report
                .built_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            report.model.as_deref().unwrap_or("-"),
        );
        if let Freshness::Unreadable(reason) = &report.freshness {
            println!("    {}", reason);
        }
    }

    println!();
    println!("{} of {} subject(s) ready to load", fresh, subjects.len());
    Ok(())
}
