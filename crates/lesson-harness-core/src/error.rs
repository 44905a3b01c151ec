//! Error taxonomy of the vectorstore cache.
//!
//! Cache-miss and corruption conditions (`NotFound`, `CorruptArtifact`) are
//! internal signals: the cache manager answers them with a rebuild and they
//! never reach a caller. Every other variant means no valid index could be
//! produced for one subject, and is surfaced to that subject's caller only.
//!
//! Errors are `Clone` so that one rebuild outcome can be handed to every
//! caller that waited on it; I/O sources are shared behind `Arc`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// A single file that could not be chunked or embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailure {
    /// Path relative to the subject directory.
    pub path: String,
    pub reason: String,
}

impl fmt::Display for IngestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("unknown subject: {subject}")]
    UnknownSubject { subject: String },

    #[error("cannot read sources of {subject} at {}: {source}", .path.display())]
    SourceUnreadable {
        subject: String,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("no cached index for {subject}")]
    NotFound { subject: String },

    #[error("corrupt cached index for {subject}: {reason}")]
    CorruptArtifact { subject: String, reason: String },

    #[error("rebuild of {subject} aborted, {} file(s) failed: {}", .failures.len(), join_failures(.failures))]
    PartialIngestFailure {
        subject: String,
        failures: Vec<IngestFailure>,
    },

    #[error("subject {subject} has no source documents")]
    EmptySubject { subject: String },

    #[error("failed to write index for {subject} at {}: {source}", .path.display())]
    ArtifactWrite {
        subject: String,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("rebuild of {subject} was interrupted: {reason}")]
    Interrupted { subject: String, reason: String },
}

impl CacheError {
    pub fn source_unreadable(
        subject: impl Into<String>,
        path: impl Into<PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::SourceUnreadable {
            subject: subject.into(),
            path: path.into(),
            source: Arc::new(err),
        }
    }

    pub fn artifact_write(
        subject: impl Into<String>,
        path: impl Into<PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::ArtifactWrite {
            subject: subject.into(),
            path: path.into(),
            source: Arc::new(err),
        }
    }

    pub fn corrupt(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Subject the error is scoped to.
    pub fn subject(&self) -> &str {
        match self {
            Self::UnknownSubject { subject }
            | Self::SourceUnreadable { subject, .. }
            | Self::NotFound { subject }
            | Self::CorruptArtifact { subject, .. }
            | Self::PartialIngestFailure { subject, .. }
            | Self::EmptySubject { subject }
            | Self::ArtifactWrite { subject, .. }
            | Self::Interrupted { subject, .. } => subject,
        }
    }

    /// Whether this error may reach a caller of `get_index`.
    ///
    /// `NotFound` and `CorruptArtifact` are answered with a rebuild.
    pub fn is_surfaced(&self) -> bool {
        !matches!(self, Self::NotFound { .. } | Self::CorruptArtifact { .. })
    }

    /// Short machine-readable kind, used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSubject { .. } => "unknown_subject",
            Self::SourceUnreadable { .. } => "source_unreadable",
            Self::NotFound { .. } => "not_found",
            Self::CorruptArtifact { .. } => "corrupt_artifact",
            Self::PartialIngestFailure { .. } => "partial_ingest_failure",
            Self::EmptySubject { .. } => "empty_subject",
            Self::ArtifactWrite { .. } => "artifact_write",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}

fn join_failures(failures: &[IngestFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
