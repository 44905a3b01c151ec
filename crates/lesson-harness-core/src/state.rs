//! Per-subject lifecycle state.
//!
//! ```text
//! unknown ──► loading ──► ready ◄──┐
//!    │           │          │      │
//!    │           ▼          ▼      │
//!    └──────► building ─────┴──────┘
//!                │
//!                ▼
//!             failed ──► loading | building | ready
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SubjectState {
    /// Registered, never resolved in this process.
    Unknown,
    /// Reading a persisted artifact.
    Loading,
    /// A valid index is resident.
    Ready,
    /// A rebuild is running.
    Building,
    /// The last resolution failed; carries the reason.
    Failed(String),
}

impl SubjectState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Every state may be re-entered from `Ready` or `Failed` so that a
    /// changed source set can trigger a fresh resolve, but a rebuild can
    /// never start while one is already running. `Failed → Ready` happens
    /// when a resident index is still valid after a failed forced rebuild.
    pub fn can_transition_to(&self, next: &SubjectState) -> bool {
        use SubjectState::*;
        match (self, next) {
            (Unknown, Loading | Building | Failed(_)) => true,
            (Loading, Ready | Building | Failed(_)) => true,
            (Building, Ready | Failed(_)) => true,
            (Ready, Loading | Building | Failed(_) | Unknown) => true,
            (Failed(_), Loading | Building | Ready | Failed(_) | Unknown) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Building => "building",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Default for SubjectState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for SubjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}
