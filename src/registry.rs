//! Subject discovery and per-subject lifecycle state.
//!
//! Every immediate, non-hidden subdirectory of the curriculum root is a
//! subject, whether or not it contains any documents yet. The registry
//! holds one [`SubjectState`] per subject; states live only in memory and
//! start as `unknown` on every process start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};

use lesson_harness_core::{CacheError, SubjectState};

#[derive(Debug)]
pub struct SubjectRegistry {
    root: PathBuf,
    states: RwLock<BTreeMap<String, SubjectState>>,
}

impl SubjectRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            states: RwLock::new(BTreeMap::new()),
        }
    }

    /// Re-list the curriculum root and register any new subjects.
    ///
    /// Known subjects keep their state. A missing root yields no subjects.
    pub fn discover_subjects(&self) -> Result<Vec<String>> {
        let found = list_subject_dirs(&self.root)?;

        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        for name in &found {
            if !states.contains_key(name) {
                tracing::debug!(subject = %name, "discovered subject");
                states.insert(name.clone(), SubjectState::Unknown);
            }
        }
        Ok(found)
    }

    /// All registered subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Registered subjects with their current state.
    pub fn snapshot(&self) -> Vec<(String, SubjectState)> {
        self.read()
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    }

    /// Whether `subject` is registered, without touching the disk.
    pub fn contains(&self, subject: &str) -> bool {
        self.read().contains_key(subject)
    }

    /// Fail with `UnknownSubject` unless `subject` is registered, re-running
    /// discovery once first.
    pub fn ensure_known(&self, subject: &str) -> Result<(), CacheError> {
        if self.contains(subject) {
            return Ok(());
        }
        if let Err(e) = self.discover_subjects() {
            tracing::warn!(error = %e, "subject re-discovery failed");
        }
        if self.read().contains_key(subject) {
            Ok(())
        } else {
            Err(CacheError::UnknownSubject {
                subject: subject.to_string(),
            })
        }
    }

    pub fn get_state(&self, subject: &str) -> Result<SubjectState, CacheError> {
        self.ensure_known(subject)?;
        self.read()
            .get(subject)
            .cloned()
            .ok_or_else(|| CacheError::UnknownSubject {
                subject: subject.to_string(),
            })
    }

    /// Move `subject` to `next`. Transitions the state machine does not
    /// allow are applied but logged.
    pub fn set_state(&self, subject: &str, next: SubjectState) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        match states.get_mut(subject) {
            Some(current) => {
                if !current.can_transition_to(&next) {
                    tracing::warn!(
                        subject,
                        from = %current,
                        to = %next,
                        "unexpected subject state transition"
                    );
                }
                *current = next;
            }
            None => tracing::warn!(subject, to = %next, "state change for unregistered subject"),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, SubjectState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn list_subject_dirs(root: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to list curriculum root: {}", root.display())
            })
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "skipping non-UTF-8 subject directory");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
