//! Append-only lesson logs, one per scope.
//!
//! Each log is a JSON-lines file. Writers take an exclusive lock on a sibling
//! `.lock` file, read the whole log, and append only if no existing entry
//! already covers the candidate. An entry covers a candidate when it has the
//! same content id, when their word sets are similar enough, or when one word
//! set contains the other.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::review::{jaccard_similarity, word_set};
use crate::signals::{LessonSignal, LessonTarget};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonScope {
    /// Tied to this target
    Project,
    /// Applies to any future run
    Global,
}

impl fmt::Display for LessonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Global => write!(f, "global"),
        }
    }
}

impl LessonTarget {
    pub fn scopes(&self) -> &'static [LessonScope] {
        match self {
            Self::Project => &[LessonScope::Project],
            Self::Global => &[LessonScope::Global],
            Self::Both => &[LessonScope::Project, LessonScope::Global],
        }
    }
}

/// A lesson not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonCandidate {
    pub category: String,
    pub text: String,
}

impl LessonCandidate {
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
        }
    }
}

impl From<&LessonSignal> for LessonCandidate {
    fn from(signal: &LessonSignal) -> Self {
        Self::new(signal.category.clone(), signal.text.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonEntry {
    /// sha256 of the normalised text
    pub id: String,
    pub scope: LessonScope,
    pub category: String,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

/// Lower-case, single-spaced, without trailing punctuation.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', ';', ':'])
        .to_lowercase()
}

pub fn content_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct LessonStore {
    project_file: PathBuf,
    global_file: PathBuf,
    threshold: f64,
}

impl LessonStore {
    pub fn new(project_file: PathBuf, global_file: PathBuf, threshold: f64) -> Self {
        Self {
            project_file,
            global_file,
            threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let threshold = config
            .pipeline
            .lessons
            .as_ref()
            .map(|l| l.similarity_threshold)
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        Self::new(
            config.lessons_file.clone(),
            config.global_lessons_file(),
            threshold,
        )
    }

    pub fn path(&self, scope: LessonScope) -> &Path {
        match scope {
            LessonScope::Project => &self.project_file,
            LessonScope::Global => &self.global_file,
        }
    }

    /// Append `candidate` to `scope` unless an existing entry covers it.
    ///
    /// Returns `false` when the candidate was discarded as a duplicate.
    pub fn record(&self, candidate: &LessonCandidate, scope: LessonScope) -> Result<bool> {
        let path = self.path(scope);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lesson lock {}", lock_path.display()))?;
        FileExt::lock_exclusive(&lock_file)
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

        let existing = read_entries(path)?;
        let id = content_id(&candidate.text);
        if let Some(covering) = existing.iter().find(|e| self.covers(e, &id, &candidate.text)) {
            tracing::debug!(%scope, existing = %covering.id, "lesson already covered, discarding");
            return Ok(false);
        }

        let entry = LessonEntry {
            id,
            scope,
            category: candidate.category.clone(),
            text: candidate.text.trim().to_string(),
            recorded_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).context("Failed to serialize lesson")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line).context("Failed to append lesson")?;
        file.sync_all().context("Failed to sync lesson log")?;

        FileExt::unlock(&lock_file).ok();
        tracing::info!(%scope, category = %entry.category, "lesson recorded");
        Ok(true)
    }

    /// Record a `LESSON` line in every scope it targets.
    pub fn record_signal(&self, signal: &LessonSignal) -> Result<Vec<(LessonScope, bool)>> {
        let candidate = LessonCandidate::from(signal);
        signal
            .target
            .scopes()
            .iter()
            .map(|&scope| Ok((scope, self.record(&candidate, scope)?)))
            .collect()
    }

    pub fn entries(&self, scope: LessonScope) -> Result<Vec<LessonEntry>> {
        read_entries(self.path(scope))
    }

    fn covers(&self, existing: &LessonEntry, id: &str, text: &str) -> bool {
        if existing.id == id {
            return true;
        }
        if jaccard_similarity(&existing.text, text) >= self.threshold {
            return true;
        }
        let ours = word_set(&existing.text);
        let theirs = word_set(text);
        !ours.is_empty() && !theirs.is_empty() && (ours.is_subset(&theirs) || theirs.is_subset(&ours))
    }
}

fn read_entries(path: &Path) -> Result<Vec<LessonEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut entries = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LessonEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed lesson"),
        }
    }
    Ok(entries)
}
